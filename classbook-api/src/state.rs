use classbook_booking::BookingEngine;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BookingEngine>,
}

impl AppState {
    pub fn new(engine: BookingEngine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}
