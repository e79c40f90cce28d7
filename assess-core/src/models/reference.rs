//! Reference catalogs: fixed option lists that seed row fields.
//!
//! Catalogs are caller-owned data. The engine only ever reads them,
//! matching options by exact key equality against the list's designated
//! key field.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One selectable option: a flat map of field name to value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceOption {
    pub values: BTreeMap<String, String>,
}

impl ReferenceOption {
    pub fn new(values: &[(&str, &str)]) -> Self {
        Self {
            values: values
                .iter()
                .map(|(field, value)| (field.to_string(), value.to_string()))
                .collect(),
        }
    }

    /// The option's value for `field`, empty if the catalog has no such
    /// column.
    pub fn value(&self, field: &str) -> &str {
        self.values.get(field).map(String::as_str).unwrap_or("")
    }
}

/// An ordered option list keyed by one of its fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceList {
    pub key_field: String,
    pub options: Vec<ReferenceOption>,
}

impl ReferenceList {
    pub fn new(key_field: &str, options: Vec<ReferenceOption>) -> Self {
        Self {
            key_field: key_field.to_string(),
            options,
        }
    }

    /// Finds the option whose key field equals `key` exactly.
    pub fn find(&self, key: &str) -> Option<&ReferenceOption> {
        self.options
            .iter()
            .find(|option| option.value(&self.key_field) == key)
    }
}

/// All catalogs available to a record, keyed by catalog name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceLibrary {
    pub lists: BTreeMap<String, ReferenceList>,
}

impl ReferenceLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, catalog: &str, list: ReferenceList) {
        self.lists.insert(catalog.to_string(), list);
    }

    pub fn get(&self, catalog: &str) -> Option<&ReferenceList> {
        self.lists.get(catalog)
    }
}
