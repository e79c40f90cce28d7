//! The in-memory record the engine operates on.
//!
//! A [`Record`] is a set of named [`Collection`]s of [`Row`]s plus the
//! computed aggregate values. Rows hold raw entry text keyed by field
//! name; the engine owns all derivation, so nothing here does arithmetic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identity of a row, assigned at creation and never reused.
///
/// Identifiers survive reordering and removal of sibling rows; removing a
/// row retires its identifier permanently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowId(Uuid);

impl RowId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for RowId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for RowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single field value within a row.
///
/// Numeric fields keep the text exactly as entered; coercion to a number
/// happens at computation time. A selection holds the key of the chosen
/// reference option, or `None` when cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    Text(String),
    Selection(Option<String>),
}

impl FieldValue {
    pub fn empty_text() -> Self {
        Self::Text(String::new())
    }

    /// The entry text, or `""` for selections.
    pub fn as_text(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Selection(_) => "",
        }
    }

    pub fn as_selection(&self) -> Option<&str> {
        match self {
            Self::Selection(key) => key.as_deref(),
            Self::Text(_) => None,
        }
    }
}

/// One line item: a mapping from field name to value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub id: RowId,
    pub values: BTreeMap<String, FieldValue>,
}

impl Row {
    pub fn new(id: RowId) -> Self {
        Self {
            id,
            values: BTreeMap::new(),
        }
    }

    /// The value of `field`, or an empty string if the row has no entry
    /// for it (loaded data may predate a schema addition).
    pub fn text(&self, field: &str) -> &str {
        self.values.get(field).map(FieldValue::as_text).unwrap_or("")
    }

    pub fn set(&mut self, field: &str, value: FieldValue) {
        self.values.insert(field.to_string(), value);
    }
}

/// An ordered sequence of rows. Order is significant for display only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub rows: Vec<Row>,
}

impl Collection {
    pub fn row(&self, id: RowId) -> Option<&Row> {
        self.rows.iter().find(|row| row.id == id)
    }

    pub fn row_mut(&mut self, id: RowId) -> Option<&mut Row> {
        self.rows.iter_mut().find(|row| row.id == id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// The record under edit: named collections plus computed aggregates.
///
/// Aggregate values are written only by the engine; callers read them
/// through [`Record::aggregate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub collections: BTreeMap<String, Collection>,
    aggregates: BTreeMap<String, String>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection(&self, name: &str) -> Option<&Collection> {
        self.collections.get(name)
    }

    /// The collection named `name`, created empty on first access.
    pub fn collection_mut(&mut self, name: &str) -> &mut Collection {
        self.collections.entry(name.to_string()).or_default()
    }

    /// The current value of a computed aggregate, if the engine has
    /// produced one.
    pub fn aggregate(&self, name: &str) -> Option<&str> {
        self.aggregates.get(name).map(String::as_str)
    }

    pub(crate) fn set_aggregate(&mut self, name: &str, value: String) {
        self.aggregates.insert(name.to_string(), value);
    }
}
