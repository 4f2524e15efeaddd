//! services/api/src/web/state.rs
//!
//! Defines the application state shared by every handler.

use std::sync::Arc;
use tutor_core::TutorService;

/// Created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub tutor: Arc<TutorService>,
}

impl AppState {
    pub fn new(tutor: TutorService) -> Self {
        Self { tutor: Arc::new(tutor) }
    }
}
