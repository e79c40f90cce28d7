//! The derived-field recalculation engine.
//!
//! Every edit to a record goes through one of five operations here; the
//! engine keeps row-level derived fields and record-level aggregates
//! consistent with the inputs so callers never sequence updates by hand.
//!
//! On any input mutation the engine performs a two-phase update: first it
//! recomputes the row-local derived fields transitively reachable from
//! the changed fields, in the schema's topological order; then it
//! recomputes every aggregate whose source column was touched. All name
//! resolution happens before the first mutation, so a configuration
//! error leaves the record exactly as it was.
//!
//! # Example
//!
//! ```
//! use assess_core::recalc::{Combine, CollectionSchema, FieldSpec, RecalcEngine, RecordSchema};
//! use assess_core::recalc::schema::AggregateSpec;
//! use assess_core::recalc::record::Record;
//!
//! let schema = RecordSchema::new(
//!     vec![CollectionSchema::new(
//!         "parcels",
//!         vec![
//!             FieldSpec::numeric("area"),
//!             FieldSpec::numeric("unit_value"),
//!             FieldSpec::derived(
//!                 "base_value",
//!                 Combine::Product {
//!                     left: "area".to_string(),
//!                     right: "unit_value".to_string(),
//!                 },
//!             ),
//!         ],
//!     )],
//!     vec![AggregateSpec::new("total_base_value", "base_value", &["parcels"])],
//! );
//!
//! let engine = RecalcEngine::new(schema).unwrap();
//! let mut record = Record::new();
//! let row = engine.append_row(&mut record, "parcels", &[]).unwrap();
//!
//! engine.apply_input_change(&mut record, "parcels", row, "unit_value", "0.10").unwrap();
//! engine.apply_input_change(&mut record, "parcels", row, "area", "100").unwrap();
//!
//! let parcels = record.collection("parcels").unwrap();
//! assert_eq!(parcels.row(row).unwrap().text("base_value"), "10.00");
//! assert_eq!(record.aggregate("total_base_value"), Some("10.00"));
//! ```

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::reference::ReferenceLibrary;
use crate::recalc::common::{coerce_numeric, format_amount};
use crate::recalc::record::{FieldValue, Record, Row, RowId};
use crate::recalc::schema::{
    AggregateSpec, CollectionSchema, Combine, FieldSpec, RecordSchema, SchemaError,
};

/// Configuration errors: the caller referenced something the schema does
/// not declare. User-input irregularities never surface here; they are
/// absorbed by the lenient numeric coercion.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("unknown collection '{0}'")]
    UnknownCollection(String),

    #[error("unknown field '{field}' in collection '{collection}'")]
    UnknownField { collection: String, field: String },

    #[error("field '{field}' in collection '{collection}' is not an input field")]
    NotAnInputField { collection: String, field: String },

    #[error("no row '{row}' in collection '{collection}'")]
    UnknownRow { collection: String, row: RowId },

    #[error("collection '{0}' has no selection field")]
    NoSelectionField(String),

    #[error("reference catalog '{0}' is not available")]
    UnknownCatalog(String),

    #[error("no option '{key}' in reference catalog '{catalog}'")]
    UnknownOption { catalog: String, key: String },
}

/// One changed row-level field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFieldChange {
    pub collection: String,
    pub row: RowId,
    pub field: String,
    pub value: FieldValue,
}

/// One changed aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateChange {
    pub name: String,
    pub value: String,
}

/// The set of fields an operation touched, in evaluation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdatedFields {
    pub rows: Vec<RowFieldChange>,
    pub aggregates: Vec<AggregateChange>,
}

impl UpdatedFields {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.aggregates.is_empty()
    }

    /// The reported value of a row field, if the operation changed it.
    pub fn row_value(&self, field: &str) -> Option<&FieldValue> {
        self.rows
            .iter()
            .find(|change| change.field == field)
            .map(|change| &change.value)
    }

    /// The reported value of an aggregate, if the operation changed it.
    pub fn aggregate_value(&self, name: &str) -> Option<&str> {
        self.aggregates
            .iter()
            .find(|change| change.name == name)
            .map(|change| change.value.as_str())
    }
}

struct CompiledCollection {
    /// Topological order over derived fields.
    order: Vec<String>,
    /// Field name → derived fields that read it directly.
    dependents: BTreeMap<String, Vec<String>>,
}

/// Schema-driven recalculation over a [`Record`].
///
/// The engine holds no record state; callers pass the record to each
/// operation and are responsible for serializing concurrent edits to it.
pub struct RecalcEngine {
    schema: RecordSchema,
    compiled: BTreeMap<String, CompiledCollection>,
}

impl RecalcEngine {
    /// Validates the schema and precomputes per-collection evaluation
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if the schema is defective; see
    /// [`RecordSchema::validate`].
    pub fn new(schema: RecordSchema) -> Result<Self, SchemaError> {
        schema.validate()?;

        let mut compiled = BTreeMap::new();
        for collection in &schema.collections {
            let order = collection.evaluation_order()?;
            let dependents = collection
                .dependents()
                .into_iter()
                .map(|(field, readers)| {
                    (
                        field.to_string(),
                        readers.into_iter().map(str::to_string).collect(),
                    )
                })
                .collect();
            compiled.insert(collection.name.clone(), CompiledCollection { order, dependents });
        }

        Ok(Self { schema, compiled })
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    /// Stores raw entry text for an input field and recomputes everything
    /// downstream of it.
    ///
    /// Numeric fields keep the text as typed; unparseable text counts as
    /// zero wherever the value feeds a computation. Returns the edited
    /// field plus every derived field and aggregate whose value changed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the collection, row, or field is
    /// unknown, or the field is not an input field. The record is
    /// unchanged on error.
    pub fn apply_input_change(
        &self,
        record: &mut Record,
        collection: &str,
        row_id: RowId,
        field: &str,
        value: &str,
    ) -> Result<UpdatedFields, EngineError> {
        let collection_schema = self.collection_schema(collection)?;
        match collection_schema.field(field) {
            None => {
                return Err(EngineError::UnknownField {
                    collection: collection.to_string(),
                    field: field.to_string(),
                });
            }
            Some(FieldSpec::Input { .. }) => {}
            Some(_) => {
                return Err(EngineError::NotAnInputField {
                    collection: collection.to_string(),
                    field: field.to_string(),
                });
            }
        }
        let row = Self::row_mut(record, collection, row_id)?;

        let mut updated = UpdatedFields::default();
        row.set(field, FieldValue::Text(value.to_string()));
        updated.rows.push(RowFieldChange {
            collection: collection.to_string(),
            row: row_id,
            field: field.to_string(),
            value: FieldValue::Text(value.to_string()),
        });

        let touched = self.recompute_row(collection_schema, row, &[field], &mut updated);
        self.recompute_affected_aggregates(record, collection, &touched, &mut updated);
        Ok(updated)
    }

    /// Applies a reference-option choice to the collection's selection
    /// field.
    ///
    /// Every field the option seeds updates in the same call; clearing
    /// the selection (`None`) resets all seeded fields to empty, after
    /// which their dependents recompute to zero.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the collection or row is unknown, the
    /// collection declares no selection field, the declared catalog is
    /// missing from `library`, or the option key is not in the catalog.
    /// The record is unchanged on error.
    pub fn apply_selection(
        &self,
        record: &mut Record,
        collection: &str,
        row_id: RowId,
        library: &ReferenceLibrary,
        selection: Option<&str>,
    ) -> Result<UpdatedFields, EngineError> {
        let collection_schema = self.collection_schema(collection)?;
        let (selection_field, catalog, seeds) = match collection_schema.selection_field() {
            Some(FieldSpec::Selection {
                name,
                catalog,
                seeds,
            }) => (name.as_str(), catalog.as_str(), seeds),
            _ => return Err(EngineError::NoSelectionField(collection.to_string())),
        };
        let row = Self::row_mut(record, collection, row_id)?;

        // Resolve the option before touching the row.
        let seeded: Vec<(String, String)> = match selection {
            Some(key) => {
                let list = library
                    .get(catalog)
                    .ok_or_else(|| EngineError::UnknownCatalog(catalog.to_string()))?;
                let option = list.find(key).ok_or_else(|| EngineError::UnknownOption {
                    catalog: catalog.to_string(),
                    key: key.to_string(),
                })?;
                seeds
                    .iter()
                    .map(|seed| {
                        (
                            seed.row_field.clone(),
                            option.value(&seed.option_field).to_string(),
                        )
                    })
                    .collect()
            }
            None => seeds
                .iter()
                .map(|seed| (seed.row_field.clone(), String::new()))
                .collect(),
        };

        let mut updated = UpdatedFields::default();

        let selection_value = FieldValue::Selection(selection.map(str::to_string));
        row.set(selection_field, selection_value.clone());
        updated.rows.push(RowFieldChange {
            collection: collection.to_string(),
            row: row_id,
            field: selection_field.to_string(),
            value: selection_value,
        });
        for (field, value) in &seeded {
            row.set(field, FieldValue::Text(value.clone()));
            updated.rows.push(RowFieldChange {
                collection: collection.to_string(),
                row: row_id,
                field: field.clone(),
                value: FieldValue::Text(value.clone()),
            });
        }

        let seeded_names: Vec<&str> = seeded.iter().map(|(field, _)| field.as_str()).collect();
        let touched = self.recompute_row(collection_schema, row, &seeded_names, &mut updated);
        self.recompute_affected_aggregates(record, collection, &touched, &mut updated);
        Ok(updated)
    }

    /// Appends a row with a freshly generated identifier.
    ///
    /// `template` pairs pre-fill input fields (loaded or defaulted
    /// entries); everything else starts empty. Derived fields are always
    /// computed from the inputs, never taken from the template, and
    /// aggregates are recomputed even though an empty row contributes
    /// zero.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the collection is unknown or a template
    /// entry names an unknown or non-input field.
    pub fn append_row(
        &self,
        record: &mut Record,
        collection: &str,
        template: &[(&str, &str)],
    ) -> Result<RowId, EngineError> {
        let collection_schema = self.collection_schema(collection)?;
        for (field, _) in template {
            match collection_schema.field(field) {
                None => {
                    return Err(EngineError::UnknownField {
                        collection: collection.to_string(),
                        field: field.to_string(),
                    });
                }
                Some(FieldSpec::Input { .. }) => {}
                Some(_) => {
                    return Err(EngineError::NotAnInputField {
                        collection: collection.to_string(),
                        field: field.to_string(),
                    });
                }
            }
        }

        let row_id = RowId::generate();
        let mut row = Row::new(row_id);
        for field in &collection_schema.fields {
            match field {
                FieldSpec::Input { name, .. } => row.set(name, FieldValue::empty_text()),
                FieldSpec::Selection { name, .. } => row.set(name, FieldValue::Selection(None)),
                FieldSpec::Derived { .. } => {}
            }
        }
        for (field, value) in template {
            row.set(field, FieldValue::Text(value.to_string()));
        }
        for name in &self.compiled[collection].order {
            let Some(FieldSpec::Derived { combine, .. }) = collection_schema.field(name) else {
                continue;
            };
            let value = evaluate(combine, &row);
            row.set(name, FieldValue::Text(value));
        }

        record.collection_mut(collection).rows.push(row);
        let mut updated = UpdatedFields::default();
        self.recompute_collection_aggregates(record, collection, &mut updated);
        Ok(row_id)
    }

    /// Removes a row and recomputes the collection's aggregates.
    ///
    /// Removing an unknown or already-removed identifier is a no-op, not
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownCollection`] only.
    pub fn remove_row(
        &self,
        record: &mut Record,
        collection: &str,
        row_id: RowId,
    ) -> Result<UpdatedFields, EngineError> {
        self.collection_schema(collection)?;

        if let Some(existing) = record.collections.get_mut(collection) {
            existing.rows.retain(|row| row.id != row_id);
        }

        let mut updated = UpdatedFields::default();
        self.recompute_collection_aggregates(record, collection, &mut updated);
        Ok(updated)
    }

    /// Full re-derivation pass: every derived field of every row, then
    /// every aggregate.
    ///
    /// Used after a bulk load, where the stored values may be stale or
    /// produced by an older schema. Unlike the editing operations, the
    /// result reports every recomputed field with its current value, so
    /// two consecutive calls without intervening mutation return
    /// identical output.
    pub fn recompute(&self, record: &mut Record) -> UpdatedFields {
        let mut updated = UpdatedFields::default();

        for collection_schema in &self.schema.collections {
            let order = &self.compiled[&collection_schema.name].order;
            let Some(collection) = record.collections.get_mut(&collection_schema.name) else {
                continue;
            };
            for row in &mut collection.rows {
                for name in order {
                    let Some(FieldSpec::Derived { combine, .. }) = collection_schema.field(name)
                    else {
                        continue;
                    };
                    let value = evaluate(combine, row);
                    row.set(name, FieldValue::Text(value.clone()));
                    updated.rows.push(RowFieldChange {
                        collection: collection_schema.name.clone(),
                        row: row.id,
                        field: name.clone(),
                        value: FieldValue::Text(value),
                    });
                }
            }
        }

        for aggregate in &self.schema.aggregates {
            let value = self.compute_aggregate(record, aggregate);
            record.set_aggregate(&aggregate.name, value.clone());
            updated.aggregates.push(AggregateChange {
                name: aggregate.name.clone(),
                value,
            });
        }

        updated
    }

    fn collection_schema(&self, name: &str) -> Result<&CollectionSchema, EngineError> {
        self.schema
            .collection(name)
            .ok_or_else(|| EngineError::UnknownCollection(name.to_string()))
    }

    /// Mutable access to one row. Never creates the collection as a side
    /// effect, so a failed lookup leaves the record untouched.
    fn row_mut<'a>(
        record: &'a mut Record,
        collection: &str,
        row_id: RowId,
    ) -> Result<&'a mut Row, EngineError> {
        record
            .collections
            .get_mut(collection)
            .and_then(|c| c.row_mut(row_id))
            .ok_or_else(|| EngineError::UnknownRow {
                collection: collection.to_string(),
                row: row_id,
            })
    }

    /// Recomputes the derived fields of one row that are transitively
    /// reachable from `changed`, in topological order. Returns every
    /// field touched by the edit (sources and recomputed fields alike),
    /// for aggregate selection.
    fn recompute_row(
        &self,
        collection_schema: &CollectionSchema,
        row: &mut Row,
        changed: &[&str],
        updated: &mut UpdatedFields,
    ) -> BTreeSet<String> {
        let compiled = &self.compiled[&collection_schema.name];

        // Transitive closure over direct dependents.
        let mut affected: BTreeSet<String> = BTreeSet::new();
        let mut frontier: Vec<String> = changed.iter().map(|f| f.to_string()).collect();
        let mut touched: BTreeSet<String> = frontier.iter().cloned().collect();
        while let Some(field) = frontier.pop() {
            if let Some(readers) = compiled.dependents.get(&field) {
                for reader in readers {
                    if affected.insert(reader.clone()) {
                        frontier.push(reader.clone());
                    }
                    touched.insert(reader.clone());
                }
            }
        }

        for name in &compiled.order {
            if !affected.contains(name) {
                continue;
            }
            let Some(FieldSpec::Derived { combine, .. }) = collection_schema.field(name) else {
                continue;
            };
            let value = evaluate(combine, row);
            if row.text(name) != value {
                row.set(name, FieldValue::Text(value.clone()));
                updated.rows.push(RowFieldChange {
                    collection: collection_schema.name.clone(),
                    row: row.id,
                    field: name.clone(),
                    value: FieldValue::Text(value),
                });
            }
        }

        touched
    }

    /// Recomputes aggregates whose source column in `collection` was
    /// touched, reporting only the ones whose value changed.
    fn recompute_affected_aggregates(
        &self,
        record: &mut Record,
        collection: &str,
        touched: &BTreeSet<String>,
        updated: &mut UpdatedFields,
    ) {
        for aggregate in &self.schema.aggregates {
            let affected = aggregate.collections.iter().any(|c| c == collection)
                && touched.contains(&aggregate.source_field);
            if affected {
                self.update_aggregate(record, aggregate, updated);
            }
        }
    }

    fn recompute_collection_aggregates(
        &self,
        record: &mut Record,
        collection: &str,
        updated: &mut UpdatedFields,
    ) {
        for aggregate in &self.schema.aggregates {
            if aggregate.collections.iter().any(|c| c == collection) {
                self.update_aggregate(record, aggregate, updated);
            }
        }
    }

    fn update_aggregate(
        &self,
        record: &mut Record,
        aggregate: &AggregateSpec,
        updated: &mut UpdatedFields,
    ) {
        let value = self.compute_aggregate(record, aggregate);
        if record.aggregate(&aggregate.name) != Some(value.as_str()) {
            record.set_aggregate(&aggregate.name, value.clone());
            updated.aggregates.push(AggregateChange {
                name: aggregate.name.clone(),
                value,
            });
        }
    }

    fn compute_aggregate(&self, record: &Record, aggregate: &AggregateSpec) -> String {
        let mut total = Decimal::ZERO;
        for collection_name in &aggregate.collections {
            if let Some(collection) = record.collection(collection_name) {
                for row in &collection.rows {
                    total += coerce_numeric(row.text(&aggregate.source_field));
                }
            }
        }
        format_amount(total)
    }
}

fn evaluate(combine: &Combine, row: &Row) -> String {
    let [a, b] = combine.inputs();
    let left = coerce_numeric(row.text(a));
    let right = coerce_numeric(row.text(b));
    let result = match combine {
        Combine::Product { .. } => left * right,
        Combine::Difference { .. } => left - right,
        Combine::PercentOf { .. } => left * right / Decimal::ONE_HUNDRED,
    };
    format_amount(result)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::models::reference::{ReferenceList, ReferenceOption};

    use super::*;

    /// A cut-down land-appraisal collection: selection seeds the
    /// classification and unit value, area drives a three-deep derived
    /// chain, and totals sum across rows.
    fn test_schema() -> RecordSchema {
        RecordSchema::new(
            vec![CollectionSchema::new(
                "parcels",
                vec![
                    FieldSpec::text("classification"),
                    FieldSpec::selection(
                        "classification_pick",
                        "classifications",
                        &[
                            ("classification", "classification"),
                            ("sub_classification", "sub_classification"),
                            ("unit_value", "unit_value"),
                        ],
                    ),
                    FieldSpec::text("sub_classification"),
                    FieldSpec::numeric("area"),
                    FieldSpec::numeric("unit_value"),
                    FieldSpec::derived(
                        "base_market_value",
                        Combine::Product {
                            left: "area".to_string(),
                            right: "unit_value".to_string(),
                        },
                    ),
                    FieldSpec::numeric("percent_adjustment"),
                    FieldSpec::derived(
                        "value_adjustment",
                        Combine::PercentOf {
                            base: "base_market_value".to_string(),
                            percent: "percent_adjustment".to_string(),
                        },
                    ),
                    FieldSpec::derived(
                        "market_value",
                        Combine::Difference {
                            minuend: "base_market_value".to_string(),
                            subtrahend: "value_adjustment".to_string(),
                        },
                    ),
                ],
            )],
            vec![
                AggregateSpec::new("total_area", "area", &["parcels"]),
                AggregateSpec::new("total_base_market_value", "base_market_value", &["parcels"]),
            ],
        )
    }

    fn test_library() -> ReferenceLibrary {
        let mut library = ReferenceLibrary::new();
        library.insert(
            "classifications",
            ReferenceList::new(
                "sub_classification",
                vec![
                    ReferenceOption::new(&[
                        ("classification", "Residential"),
                        ("sub_classification", "Single Detached"),
                        ("unit_value", "0.05"),
                    ]),
                    ReferenceOption::new(&[
                        ("classification", "Commercial"),
                        ("sub_classification", "Office"),
                        ("unit_value", "0.15"),
                    ]),
                ],
            ),
        );
        library
    }

    fn engine() -> RecalcEngine {
        RecalcEngine::new(test_schema()).unwrap()
    }

    fn row_text(record: &Record, row: RowId, field: &str) -> String {
        record
            .collection("parcels")
            .unwrap()
            .row(row)
            .unwrap()
            .text(field)
            .to_string()
    }

    // =========================================================================
    // apply_input_change
    // =========================================================================

    #[test]
    fn area_times_unit_value_gives_base_market_value() {
        let engine = engine();
        let mut record = Record::new();
        let row = engine.append_row(&mut record, "parcels", &[]).unwrap();
        engine
            .apply_input_change(&mut record, "parcels", row, "unit_value", "0.10")
            .unwrap();

        engine
            .apply_input_change(&mut record, "parcels", row, "area", "100")
            .unwrap();

        assert_eq!(row_text(&record, row, "base_market_value"), "10.00");
    }

    #[test]
    fn percent_adjustment_drives_value_adjustment_and_market_value() {
        let engine = engine();
        let mut record = Record::new();
        let row = engine
            .append_row(&mut record, "parcels", &[("area", "100"), ("unit_value", "10")])
            .unwrap();

        engine
            .apply_input_change(&mut record, "parcels", row, "percent_adjustment", "5")
            .unwrap();

        assert_eq!(row_text(&record, row, "base_market_value"), "1000.00");
        assert_eq!(row_text(&record, row, "value_adjustment"), "50.00");
        assert_eq!(row_text(&record, row, "market_value"), "950.00");
    }

    #[test]
    fn area_change_propagates_through_full_derived_chain() {
        let engine = engine();
        let mut record = Record::new();
        let row = engine
            .append_row(&mut record, "parcels", &[("unit_value", "10")])
            .unwrap();
        engine
            .apply_input_change(&mut record, "parcels", row, "percent_adjustment", "10")
            .unwrap();

        let updated = engine
            .apply_input_change(&mut record, "parcels", row, "area", "50")
            .unwrap();

        // Depth-two chain: base, then adjustment, then market value.
        assert_eq!(row_text(&record, row, "base_market_value"), "500.00");
        assert_eq!(row_text(&record, row, "value_adjustment"), "50.00");
        assert_eq!(row_text(&record, row, "market_value"), "450.00");
        assert_eq!(
            updated.row_value("market_value"),
            Some(&FieldValue::Text("450.00".to_string()))
        );
    }

    #[test]
    fn unparseable_area_counts_as_zero() {
        let engine = engine();
        let mut record = Record::new();
        let row = engine
            .append_row(&mut record, "parcels", &[("unit_value", "0.10")])
            .unwrap();

        engine
            .apply_input_change(&mut record, "parcels", row, "area", "abc")
            .unwrap();

        // The raw entry text is preserved; only the arithmetic sees zero.
        assert_eq!(row_text(&record, row, "area"), "abc");
        assert_eq!(row_text(&record, row, "base_market_value"), "0.00");
    }

    #[test]
    fn negative_area_is_accepted_and_propagated() {
        let engine = engine();
        let mut record = Record::new();
        let row = engine
            .append_row(&mut record, "parcels", &[("unit_value", "2")])
            .unwrap();

        engine
            .apply_input_change(&mut record, "parcels", row, "area", "-10")
            .unwrap();

        assert_eq!(row_text(&record, row, "base_market_value"), "-20.00");
    }

    #[test]
    fn edited_field_is_always_reported() {
        let engine = engine();
        let mut record = Record::new();
        let row = engine.append_row(&mut record, "parcels", &[]).unwrap();

        // Area stays numerically zero, so no derived field changes, but
        // the edit itself is reported.
        let updated = engine
            .apply_input_change(&mut record, "parcels", row, "area", "0")
            .unwrap();

        assert_eq!(
            updated.row_value("area"),
            Some(&FieldValue::Text("0".to_string()))
        );
        assert_eq!(updated.row_value("base_market_value"), None);
        assert!(updated.aggregates.is_empty());
    }

    #[test]
    fn text_field_passes_through_without_recomputation() {
        let engine = engine();
        let mut record = Record::new();
        let row = engine.append_row(&mut record, "parcels", &[]).unwrap();

        let updated = engine
            .apply_input_change(&mut record, "parcels", row, "classification", "Residential")
            .unwrap();

        assert_eq!(row_text(&record, row, "classification"), "Residential");
        assert_eq!(updated.rows.len(), 1);
    }

    #[test]
    fn unknown_collection_is_a_configuration_error() {
        let engine = engine();
        let mut record = Record::new();

        let result =
            engine.apply_input_change(&mut record, "lots", RowId::generate(), "area", "1");

        assert_eq!(result, Err(EngineError::UnknownCollection("lots".to_string())));
    }

    #[test]
    fn unknown_field_is_a_configuration_error() {
        let engine = engine();
        let mut record = Record::new();
        let row = engine.append_row(&mut record, "parcels", &[]).unwrap();

        let result = engine.apply_input_change(&mut record, "parcels", row, "depth", "1");

        assert_eq!(
            result,
            Err(EngineError::UnknownField {
                collection: "parcels".to_string(),
                field: "depth".to_string(),
            })
        );
    }

    #[test]
    fn editing_a_derived_field_is_rejected() {
        let engine = engine();
        let mut record = Record::new();
        let row = engine.append_row(&mut record, "parcels", &[]).unwrap();

        let result =
            engine.apply_input_change(&mut record, "parcels", row, "base_market_value", "999");

        assert_eq!(
            result,
            Err(EngineError::NotAnInputField {
                collection: "parcels".to_string(),
                field: "base_market_value".to_string(),
            })
        );
        // Nothing changed.
        assert_eq!(row_text(&record, row, "base_market_value"), "0.00");
    }

    #[test]
    fn unknown_row_is_a_configuration_error() {
        let engine = engine();
        let mut record = Record::new();
        engine.append_row(&mut record, "parcels", &[]).unwrap();
        let stranger = RowId::generate();

        let result = engine.apply_input_change(&mut record, "parcels", stranger, "area", "1");

        assert_eq!(
            result,
            Err(EngineError::UnknownRow {
                collection: "parcels".to_string(),
                row: stranger,
            })
        );
    }

    // =========================================================================
    // aggregates
    // =========================================================================

    #[test]
    fn aggregate_sums_across_rows() {
        let engine = engine();
        let mut record = Record::new();
        let first = engine
            .append_row(&mut record, "parcels", &[("unit_value", "0.10")])
            .unwrap();
        let second = engine
            .append_row(&mut record, "parcels", &[("unit_value", "0.10")])
            .unwrap();
        engine
            .apply_input_change(&mut record, "parcels", first, "area", "100")
            .unwrap();
        engine
            .apply_input_change(&mut record, "parcels", second, "area", "200")
            .unwrap();

        assert_eq!(record.aggregate("total_area"), Some("300.00"));
        assert_eq!(record.aggregate("total_base_market_value"), Some("30.00"));
    }

    #[test]
    fn appending_an_empty_row_leaves_aggregates_unchanged() {
        let engine = engine();
        let mut record = Record::new();
        let row = engine
            .append_row(&mut record, "parcels", &[("unit_value", "1")])
            .unwrap();
        engine
            .apply_input_change(&mut record, "parcels", row, "area", "40")
            .unwrap();

        engine.append_row(&mut record, "parcels", &[]).unwrap();

        assert_eq!(record.aggregate("total_area"), Some("40.00"));
    }

    #[test]
    fn removing_a_row_subtracts_its_contribution() {
        let engine = engine();
        let mut record = Record::new();
        let first = engine
            .append_row(&mut record, "parcels", &[("unit_value", "1")])
            .unwrap();
        let second = engine
            .append_row(&mut record, "parcels", &[("unit_value", "1")])
            .unwrap();
        engine
            .apply_input_change(&mut record, "parcels", first, "area", "10")
            .unwrap();
        engine
            .apply_input_change(&mut record, "parcels", second, "area", "20")
            .unwrap();

        let updated = engine.remove_row(&mut record, "parcels", second).unwrap();

        assert_eq!(record.aggregate("total_area"), Some("10.00"));
        assert_eq!(updated.aggregate_value("total_area"), Some("10.00"));
    }

    #[test]
    fn removing_an_unknown_row_is_a_silent_no_op() {
        let engine = engine();
        let mut record = Record::new();
        let row = engine
            .append_row(&mut record, "parcels", &[("area", "10")])
            .unwrap();
        engine.remove_row(&mut record, "parcels", row).unwrap();

        let updated = engine.remove_row(&mut record, "parcels", row).unwrap();

        assert!(updated.is_empty());
        assert_eq!(record.aggregate("total_area"), Some("0.00"));
    }

    #[test]
    fn row_ids_are_never_reused() {
        let engine = engine();
        let mut record = Record::new();

        let first = engine.append_row(&mut record, "parcels", &[]).unwrap();
        engine.remove_row(&mut record, "parcels", first).unwrap();
        let second = engine.append_row(&mut record, "parcels", &[]).unwrap();

        assert_ne!(first, second);
    }

    // =========================================================================
    // apply_selection
    // =========================================================================

    #[test]
    fn selection_seeds_all_bound_fields_atomically() {
        let engine = engine();
        let library = test_library();
        let mut record = Record::new();
        let row = engine
            .append_row(&mut record, "parcels", &[("area", "100")])
            .unwrap();

        let updated = engine
            .apply_selection(&mut record, "parcels", row, &library, Some("Single Detached"))
            .unwrap();

        assert_eq!(row_text(&record, row, "classification"), "Residential");
        assert_eq!(row_text(&record, row, "sub_classification"), "Single Detached");
        assert_eq!(row_text(&record, row, "unit_value"), "0.05");
        // The seeded unit value recomputes the derived chain in the same call.
        assert_eq!(row_text(&record, row, "base_market_value"), "5.00");
        assert_eq!(updated.row_value("unit_value"), Some(&FieldValue::Text("0.05".to_string())));
        assert_eq!(updated.aggregate_value("total_base_market_value"), Some("5.00"));
    }

    #[test]
    fn clearing_a_selection_resets_seeded_fields_and_derived_values() {
        let engine = engine();
        let library = test_library();
        let mut record = Record::new();
        let row = engine
            .append_row(&mut record, "parcels", &[("area", "100")])
            .unwrap();
        engine
            .apply_selection(&mut record, "parcels", row, &library, Some("Office"))
            .unwrap();

        engine
            .apply_selection(&mut record, "parcels", row, &library, None)
            .unwrap();

        assert_eq!(row_text(&record, row, "classification"), "");
        assert_eq!(row_text(&record, row, "sub_classification"), "");
        assert_eq!(row_text(&record, row, "unit_value"), "");
        assert_eq!(row_text(&record, row, "base_market_value"), "0.00");
        assert_eq!(record.aggregate("total_base_market_value"), Some("0.00"));
    }

    #[test]
    fn unknown_option_key_is_a_configuration_error() {
        let engine = engine();
        let library = test_library();
        let mut record = Record::new();
        let row = engine
            .append_row(&mut record, "parcels", &[("area", "100")])
            .unwrap();

        let result =
            engine.apply_selection(&mut record, "parcels", row, &library, Some("Warehouse"));

        assert_eq!(
            result,
            Err(EngineError::UnknownOption {
                catalog: "classifications".to_string(),
                key: "Warehouse".to_string(),
            })
        );
        // Atomic: no seeded field was touched.
        assert_eq!(row_text(&record, row, "classification"), "");
        assert_eq!(row_text(&record, row, "unit_value"), "");
    }

    #[test]
    fn missing_catalog_is_a_configuration_error() {
        let engine = engine();
        let mut record = Record::new();
        let row = engine.append_row(&mut record, "parcels", &[]).unwrap();

        let result = engine.apply_selection(
            &mut record,
            "parcels",
            row,
            &ReferenceLibrary::new(),
            Some("Office"),
        );

        assert_eq!(
            result,
            Err(EngineError::UnknownCatalog("classifications".to_string()))
        );
    }

    // =========================================================================
    // append_row
    // =========================================================================

    #[test]
    fn appended_row_has_empty_inputs_and_zero_derived_values() {
        let engine = engine();
        let mut record = Record::new();

        let row = engine.append_row(&mut record, "parcels", &[]).unwrap();

        assert_eq!(row_text(&record, row, "area"), "");
        assert_eq!(row_text(&record, row, "base_market_value"), "0.00");
        assert_eq!(row_text(&record, row, "market_value"), "0.00");
    }

    #[test]
    fn template_values_feed_derived_computation() {
        let engine = engine();
        let mut record = Record::new();

        let row = engine
            .append_row(&mut record, "parcels", &[("area", "20"), ("unit_value", "3")])
            .unwrap();

        assert_eq!(row_text(&record, row, "base_market_value"), "60.00");
        assert_eq!(record.aggregate("total_base_market_value"), Some("60.00"));
    }

    #[test]
    fn template_cannot_set_derived_fields() {
        let engine = engine();
        let mut record = Record::new();

        let result = engine.append_row(&mut record, "parcels", &[("base_market_value", "999")]);

        assert_eq!(
            result,
            Err(EngineError::NotAnInputField {
                collection: "parcels".to_string(),
                field: "base_market_value".to_string(),
            })
        );
        assert!(record.collection("parcels").is_none());
    }

    // =========================================================================
    // recompute
    // =========================================================================

    #[test]
    fn recompute_repairs_stale_loaded_values() {
        let engine = engine();
        let mut record = Record::new();
        let row = engine
            .append_row(&mut record, "parcels", &[("area", "100"), ("unit_value", "0.10")])
            .unwrap();
        // Simulate a stale load: clobber a derived value behind the
        // engine's back.
        record
            .collection_mut("parcels")
            .row_mut(row)
            .unwrap()
            .set("base_market_value", FieldValue::Text("999.99".to_string()));

        engine.recompute(&mut record);

        assert_eq!(row_text(&record, row, "base_market_value"), "10.00");
        assert_eq!(record.aggregate("total_base_market_value"), Some("10.00"));
    }

    #[test]
    fn recompute_twice_produces_identical_output() {
        let engine = engine();
        let mut record = Record::new();
        engine
            .append_row(&mut record, "parcels", &[("area", "100"), ("unit_value", "0.10")])
            .unwrap();

        let first = engine.recompute(&mut record);
        let second = engine.recompute(&mut record);

        assert_eq!(first, second);
    }

    #[test]
    fn recompute_ignores_collections_with_no_rows_yet() {
        let engine = engine();
        let mut record = Record::new();

        let updated = engine.recompute(&mut record);

        assert!(updated.rows.is_empty());
        assert_eq!(updated.aggregate_value("total_area"), Some("0.00"));
    }
}
