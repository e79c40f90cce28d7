use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Assessment, NewAssessment, ReferenceList};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("Record not found")]
    NotFound,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

#[async_trait]
pub trait AssessmentRepository: Send + Sync {
    // Assessments
    async fn create_assessment(
        &self,
        assessment: NewAssessment,
    ) -> Result<Assessment, RepositoryError>;

    async fn get_assessment(&self, id: i64) -> Result<Assessment, RepositoryError>;

    async fn update_assessment(&self, assessment: &Assessment) -> Result<(), RepositoryError>;

    async fn delete_assessment(&self, id: i64) -> Result<(), RepositoryError>;

    async fn list_assessments(&self) -> Result<Vec<Assessment>, RepositoryError>;

    // Reference catalogs
    async fn get_reference_list(&self, catalog: &str) -> Result<ReferenceList, RepositoryError>;

    async fn replace_reference_list(
        &self,
        catalog: &str,
        list: &ReferenceList,
    ) -> Result<(), RepositoryError>;

    async fn list_catalogs(&self) -> Result<Vec<String>, RepositoryError>;
}
