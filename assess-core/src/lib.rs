pub mod db;
pub mod forms;
pub mod models;
pub mod recalc;

pub use db::repository::{AssessmentRepository, RepositoryError};
pub use models::*;
pub use recalc::{EngineError, RecalcEngine, Record, RowId, SchemaError, UpdatedFields};
