use async_trait::async_trait;

use assess_core::db::repository::{AssessmentRepository, RepositoryError};
use assess_core::db::{DbConfig, RepositoryFactory};

use crate::repository::SqliteRepository;

/// [`RepositoryFactory`] for SQLite.
///
/// Register this with a [`assess_core::db::RepositoryRegistry`] to make
/// the `"sqlite"` backend available:
///
/// ```rust,no_run
/// use assess_core::db::RepositoryRegistry;
/// use assess_db_sqlite::SqliteRepositoryFactory;
///
/// let mut registry = RepositoryRegistry::new();
/// registry.register(Box::new(SqliteRepositoryFactory));
/// ```
pub struct SqliteRepositoryFactory;

/// Maps the registry's backend-agnostic connection string onto a sqlx
/// SQLite URL. Bare file paths are opened in create-if-missing mode.
fn database_url(connection_string: &str) -> String {
    if connection_string == ":memory:" {
        "sqlite::memory:".to_string()
    } else if connection_string.starts_with("sqlite:") {
        connection_string.to_string()
    } else {
        format!("sqlite:{connection_string}?mode=rwc")
    }
}

#[async_trait]
impl RepositoryFactory for SqliteRepositoryFactory {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    /// Open the database described by `config.connection_string` and run
    /// migrations.
    ///
    /// Accepted connection-string values:
    /// * A bare file path — e.g. `"assessments.db"`, created if missing.
    /// * `":memory:"` — an ephemeral in-memory database.
    /// * A full sqlx URL — e.g. `"sqlite:assessments.db?mode=rwc"`.
    async fn create(
        &self,
        config: &DbConfig,
    ) -> Result<Box<dyn AssessmentRepository>, RepositoryError> {
        let repo = SqliteRepository::new(&database_url(&config.connection_string)).await?;
        repo.run_migrations().await?;
        Ok(Box::new(repo))
    }
}
