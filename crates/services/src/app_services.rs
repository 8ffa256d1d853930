use std::sync::Arc;

use practice_core::ProblemCatalog;
use storage::repository::Storage;

use crate::Clock;
use crate::auth::Authenticator;
use crate::error::AppServicesError;
use crate::progress_service::ProgressService;

/// Assembles the server-facing services.
#[derive(Clone)]
pub struct AppServices {
    catalog: Arc<ProblemCatalog>,
    progress: Arc<ProgressService>,
    auth: Arc<dyn Authenticator>,
}

impl AppServices {
    #[must_use]
    pub fn new(
        storage: &Storage,
        clock: Clock,
        catalog: Arc<ProblemCatalog>,
        auth: Arc<dyn Authenticator>,
    ) -> Self {
        let progress = Arc::new(ProgressService::new(
            clock,
            Arc::clone(&catalog),
            Arc::clone(&storage.progress),
        ));
        Self {
            catalog,
            progress,
            auth,
        }
    }

    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        catalog: Arc<ProblemCatalog>,
        auth: Arc<dyn Authenticator>,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        tracing::info!(problems = catalog.len(), "progress storage ready");
        Ok(Self::new(&storage, clock, catalog, auth))
    }

    #[must_use]
    pub fn catalog(&self) -> Arc<ProblemCatalog> {
        Arc::clone(&self.catalog)
    }

    #[must_use]
    pub fn progress(&self) -> Arc<ProgressService> {
        Arc::clone(&self.progress)
    }

    #[must_use]
    pub fn auth(&self) -> Arc<dyn Authenticator> {
        Arc::clone(&self.auth)
    }
}
