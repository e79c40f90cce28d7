//! Derived-field recalculation over schema-driven records.

pub mod common;
pub mod engine;
pub mod record;
pub mod schema;

pub use engine::{AggregateChange, EngineError, RecalcEngine, RowFieldChange, UpdatedFields};
pub use record::{Collection, FieldValue, Record, Row, RowId};
pub use schema::{
    AggregateSpec, CollectionSchema, Combine, FieldSpec, FieldType, RecordSchema, SchemaError, Seed,
};
