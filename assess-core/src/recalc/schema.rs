//! Declarative schema for a record's collections, derived fields and
//! aggregates.
//!
//! A schema is plain data: each collection lists its fields, each derived
//! field names the pure combination that produces it, and each aggregate
//! names a source column and the collections it sums over. The engine
//! validates a schema once at construction and precomputes a topological
//! evaluation order per collection, so derived chains of any depth
//! evaluate the same way regardless of which input changed first.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by schema validation.
///
/// These signal a defect in the schema definition, not in user input;
/// a schema that validates once will never raise them again.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("duplicate collection '{0}'")]
    DuplicateCollection(String),

    #[error("duplicate field '{field}' in collection '{collection}'")]
    DuplicateField { collection: String, field: String },

    #[error("derived field '{derived}' in collection '{collection}' references unknown field '{input}'")]
    UnknownInput {
        collection: String,
        derived: String,
        input: String,
    },

    #[error("derived field '{derived}' in collection '{collection}' references non-numeric field '{input}'")]
    NonNumericInput {
        collection: String,
        derived: String,
        input: String,
    },

    #[error("circular dependency among derived fields in collection '{0}'")]
    CircularDependency(String),

    #[error("collection '{0}' declares more than one selection field")]
    MultipleSelectionFields(String),

    #[error("selection field '{selection}' in collection '{collection}' seeds unknown field '{target}'")]
    UnknownSeedTarget {
        collection: String,
        selection: String,
        target: String,
    },

    #[error("selection field '{selection}' in collection '{collection}' seeds non-input field '{target}'")]
    SeedTargetNotEditable {
        collection: String,
        selection: String,
        target: String,
    },

    #[error("duplicate aggregate '{0}'")]
    DuplicateAggregate(String),

    #[error("aggregate '{aggregate}' references unknown collection '{collection}'")]
    UnknownAggregateCollection {
        aggregate: String,
        collection: String,
    },

    #[error("aggregate '{aggregate}' references unknown field '{field}' in collection '{collection}'")]
    UnknownAggregateSource {
        aggregate: String,
        collection: String,
        field: String,
    },
}

/// Primitive type of an input field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    Numeric,
}

/// A pure combination producing a derived field from two sibling fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Combine {
    /// left × right
    Product { left: String, right: String },
    /// minuend − subtrahend
    Difference { minuend: String, subtrahend: String },
    /// base × percent ÷ 100
    PercentOf { base: String, percent: String },
}

impl Combine {
    /// The sibling fields this combination reads, in argument order.
    pub fn inputs(&self) -> [&str; 2] {
        match self {
            Self::Product { left, right } => [left, right],
            Self::Difference {
                minuend,
                subtrahend,
            } => [minuend, subtrahend],
            Self::PercentOf { base, percent } => [base, percent],
        }
    }
}

/// Binds one field of a reference option to one sibling field of the row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seed {
    pub option_field: String,
    pub row_field: String,
}

/// One field of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldSpec {
    /// User-editable entry field.
    Input { name: String, ty: FieldType },
    /// Read-only field recomputed from sibling fields.
    Derived { name: String, combine: Combine },
    /// A chosen reference option that seeds sibling fields atomically.
    Selection {
        name: String,
        catalog: String,
        seeds: Vec<Seed>,
    },
}

impl FieldSpec {
    pub fn text(name: &str) -> Self {
        Self::Input {
            name: name.to_string(),
            ty: FieldType::Text,
        }
    }

    pub fn numeric(name: &str) -> Self {
        Self::Input {
            name: name.to_string(),
            ty: FieldType::Numeric,
        }
    }

    pub fn derived(name: &str, combine: Combine) -> Self {
        Self::Derived {
            name: name.to_string(),
            combine,
        }
    }

    pub fn selection(name: &str, catalog: &str, seeds: &[(&str, &str)]) -> Self {
        Self::Selection {
            name: name.to_string(),
            catalog: catalog.to_string(),
            seeds: seeds
                .iter()
                .map(|(option_field, row_field)| Seed {
                    option_field: option_field.to_string(),
                    row_field: row_field.to_string(),
                })
                .collect(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Input { name, .. } | Self::Derived { name, .. } | Self::Selection { name, .. } => {
                name
            }
        }
    }
}

/// Field layout of one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub fields: Vec<FieldSpec>,
}

impl CollectionSchema {
    pub fn new(name: &str, fields: Vec<FieldSpec>) -> Self {
        Self {
            name: name.to_string(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|field| field.name() == name)
    }

    /// The collection's selection field, if it declares one.
    pub fn selection_field(&self) -> Option<&FieldSpec> {
        self.fields
            .iter()
            .find(|field| matches!(field, FieldSpec::Selection { .. }))
    }

    fn is_numeric_source(&self, name: &str) -> bool {
        match self.field(name) {
            Some(FieldSpec::Input { ty, .. }) => *ty == FieldType::Numeric,
            Some(FieldSpec::Derived { .. }) => true,
            _ => false,
        }
    }

    /// Direct dependents: field name → derived fields reading it.
    pub(crate) fn dependents(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut map: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for field in &self.fields {
            if let FieldSpec::Derived { name, combine } = field {
                for input in combine.inputs() {
                    map.entry(input).or_default().push(name);
                }
            }
        }
        map
    }

    /// Topological evaluation order over the derived fields (Kahn's
    /// algorithm), so a derived field is always computed after every
    /// derived field it reads.
    pub(crate) fn evaluation_order(&self) -> Result<Vec<String>, SchemaError> {
        let derived: Vec<(&str, &Combine)> = self
            .fields
            .iter()
            .filter_map(|field| match field {
                FieldSpec::Derived { name, combine } => Some((name.as_str(), combine)),
                _ => None,
            })
            .collect();
        let derived_names: BTreeSet<&str> = derived.iter().map(|(name, _)| *name).collect();

        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        for (name, combine) in &derived {
            let degree = combine
                .inputs()
                .iter()
                .filter(|input| derived_names.contains(*input))
                .count();
            in_degree.insert(name, degree);
        }

        // Seed the queue in declaration order for a stable result.
        let mut queue: VecDeque<&str> = derived
            .iter()
            .filter(|(name, _)| in_degree[name] == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut order = Vec::with_capacity(derived.len());
        while let Some(current) = queue.pop_front() {
            order.push(current.to_string());
            for (name, combine) in &derived {
                // A field may read the same precedent through both
                // inputs; the in-degree counted it twice.
                let uses = combine
                    .inputs()
                    .iter()
                    .filter(|input| **input == current)
                    .count();
                if uses == 0 {
                    continue;
                }
                if let Some(degree) = in_degree.get_mut(name) {
                    *degree -= uses;
                    if *degree == 0 {
                        queue.push_back(name);
                    }
                }
            }
        }

        if order.len() < derived.len() {
            return Err(SchemaError::CircularDependency(self.name.clone()));
        }
        Ok(order)
    }

    fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = BTreeSet::new();
        for field in &self.fields {
            if !seen.insert(field.name()) {
                return Err(SchemaError::DuplicateField {
                    collection: self.name.clone(),
                    field: field.name().to_string(),
                });
            }
        }

        let mut selections = 0;
        for field in &self.fields {
            match field {
                FieldSpec::Derived { name, combine } => {
                    for input in combine.inputs() {
                        if self.field(input).is_none() {
                            return Err(SchemaError::UnknownInput {
                                collection: self.name.clone(),
                                derived: name.clone(),
                                input: input.to_string(),
                            });
                        }
                        if !self.is_numeric_source(input) {
                            return Err(SchemaError::NonNumericInput {
                                collection: self.name.clone(),
                                derived: name.clone(),
                                input: input.to_string(),
                            });
                        }
                    }
                }
                FieldSpec::Selection { name, seeds, .. } => {
                    selections += 1;
                    if selections > 1 {
                        return Err(SchemaError::MultipleSelectionFields(self.name.clone()));
                    }
                    for seed in seeds {
                        match self.field(&seed.row_field) {
                            None => {
                                return Err(SchemaError::UnknownSeedTarget {
                                    collection: self.name.clone(),
                                    selection: name.clone(),
                                    target: seed.row_field.clone(),
                                });
                            }
                            Some(FieldSpec::Input { .. }) => {}
                            Some(_) => {
                                return Err(SchemaError::SeedTargetNotEditable {
                                    collection: self.name.clone(),
                                    selection: name.clone(),
                                    target: seed.row_field.clone(),
                                });
                            }
                        }
                    }
                }
                FieldSpec::Input { .. } => {}
            }
        }

        self.evaluation_order().map(|_| ())
    }
}

/// A record-level sum of one field across one or more collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSpec {
    pub name: String,
    pub source_field: String,
    pub collections: Vec<String>,
}

impl AggregateSpec {
    pub fn new(name: &str, source_field: &str, collections: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            source_field: source_field.to_string(),
            collections: collections.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// The full schema of a record: its collections and aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    pub collections: Vec<CollectionSchema>,
    pub aggregates: Vec<AggregateSpec>,
}

impl RecordSchema {
    pub fn new(collections: Vec<CollectionSchema>, aggregates: Vec<AggregateSpec>) -> Self {
        Self {
            collections,
            aggregates,
        }
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionSchema> {
        self.collections.iter().find(|c| c.name == name)
    }

    /// Checks the whole schema for defects.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] on duplicate names, references to unknown
    /// or non-numeric fields, more than one selection field per
    /// collection, seeds targeting non-input fields, or cycles among
    /// derived fields.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = BTreeSet::new();
        for collection in &self.collections {
            if !seen.insert(collection.name.as_str()) {
                return Err(SchemaError::DuplicateCollection(collection.name.clone()));
            }
            collection.validate()?;
        }

        let mut aggregate_names = BTreeSet::new();
        for aggregate in &self.aggregates {
            if !aggregate_names.insert(aggregate.name.as_str()) {
                return Err(SchemaError::DuplicateAggregate(aggregate.name.clone()));
            }
            for collection_name in &aggregate.collections {
                let collection = self.collection(collection_name).ok_or_else(|| {
                    SchemaError::UnknownAggregateCollection {
                        aggregate: aggregate.name.clone(),
                        collection: collection_name.clone(),
                    }
                })?;
                if collection.field(&aggregate.source_field).is_none() {
                    return Err(SchemaError::UnknownAggregateSource {
                        aggregate: aggregate.name.clone(),
                        collection: collection_name.clone(),
                        field: aggregate.source_field.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}
