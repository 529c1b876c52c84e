use chrono::Utc;
use classbook_core::repository::{BookingRepository, PassRepository};
use classbook_core::{BookingError, CoreResult, Pass, StoreError};
use classbook_shared::{normalize_email, Masked};
use tracing::info;
use uuid::Uuid;

use crate::context::BookingContext;
use crate::Committed;

/// Issues and activates credit passes. Credit consumption itself happens in
/// the booking ledger.
#[derive(Clone)]
pub struct PassService {
    ctx: BookingContext,
}

impl PassService {
    pub fn new(ctx: BookingContext) -> Self {
        Self { ctx }
    }

    pub async fn issue_pass(&self, email: &str, total_credits: i32) -> CoreResult<Pass> {
        if total_credits <= 0 {
            return Err(BookingError::Validation(format!(
                "a pass needs at least one credit, got {}",
                total_credits
            )));
        }
        if !normalize_email(email).contains('@') {
            return Err(BookingError::Validation("a valid email address is required".to_string()));
        }

        let pass = Pass::new(email, total_credits, Utc::now());
        self.ctx
            .store
            .insert_pass(&pass)
            .await
            .map_err(BookingError::store("storing pass"))?;

        info!(pass_id = %pass.id, email = %Masked(&pass.email), total_credits, "Pass issued");
        Ok(pass)
    }

    /// Activates a pass, counting bookings made since it was issued against
    /// its credits.
    pub async fn activate_pass(&self, pass_id: Uuid) -> CoreResult<Committed<Pass>> {
        let store = &self.ctx.store;
        let mut pass = store
            .get_pass(pass_id)
            .await
            .map_err(BookingError::store("loading pass"))?
            .ok_or(BookingError::PassNotFound(pass_id))?;
        if pass.is_active {
            return Err(BookingError::PassAlreadyActive(pass_id));
        }

        let history = store
            .list_for_email(&pass.email)
            .await
            .map_err(BookingError::store("loading booking history"))?;
        pass.activate(&history, Utc::now());

        match store.save_activation(&pass).await {
            Ok(()) => {}
            Err(StoreError::NoRowsAffected) => return Err(BookingError::PassAlreadyActive(pass_id)),
            Err(e) => return Err(BookingError::store("activating pass")(e)),
        }

        info!(
            pass_id = %pass.id,
            used_credits = pass.used_credits,
            total_credits = pass.total_credits,
            "Pass activated"
        );

        let notification = self
            .ctx
            .notify("pass activation notice", self.ctx.notifier.send_pass_activated(&pass))
            .await;
        Ok(Committed::new(pass, notification))
    }

    /// The pass the attendee's next booking would draw from, if any.
    pub async fn active_pass_for(&self, email: &str) -> CoreResult<Option<Pass>> {
        self.ctx
            .store
            .get_active_for_email(&normalize_email(email))
            .await
            .map_err(BookingError::store("loading active pass"))
    }
}
