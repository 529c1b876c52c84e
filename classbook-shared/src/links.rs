use serde::Deserialize;

/// Base addresses that confirmation and cancellation links are built from.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkBuilder {
    pub confirm_booking_url: String,
    pub confirm_cancellation_url: String,
    /// Booking id and token are appended as `/{id}?token=...`.
    pub cancel_booking_url: String,
}

impl LinkBuilder {
    pub fn confirm_booking(&self, token: &str) -> String {
        with_token(&self.confirm_booking_url, token)
    }

    pub fn confirm_cancellation(&self, token: &str) -> String {
        with_token(&self.confirm_cancellation_url, token)
    }

    pub fn cancel_booking(&self, booking_id: impl std::fmt::Display, token: &str) -> String {
        let base = format!("{}/{}", self.cancel_booking_url.trim_end_matches('/'), booking_id);
        with_token(&base, token)
    }
}

/// Tokens are base64url, so they go into the query string unescaped.
fn with_token(base: &str, token: &str) -> String {
    format!("{}?token={}", base, token)
}
