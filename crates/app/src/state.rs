use std::sync::Arc;

use practice_core::ProblemCatalog;
use services::{AppServices, Authenticator, ProgressService};

/// Shared by every handler.
pub struct AppState {
    pub catalog: Arc<ProblemCatalog>,
    pub progress: Arc<ProgressService>,
    pub auth: Arc<dyn Authenticator>,
}

impl AppState {
    #[must_use]
    pub fn new(services: &AppServices) -> Self {
        Self {
            catalog: services.catalog(),
            progress: services.progress(),
            auth: services.auth(),
        }
    }
}
