//! The real-property assessment form schema.
//!
//! One declarative schema replaces the per-tab arithmetic: every
//! collection a property record carries, the derived chain on each row,
//! and the running totals the editing screens display. The engine
//! consumes this schema; the reference catalogs it names are loaded
//! separately (see `assess-data`).
//!
//! Collections:
//!
//! | Collection             | Rows                         | Catalog            |
//! |------------------------|------------------------------|--------------------|
//! | `owners`               | property owners              | `owner_directory`  |
//! | `land_appraisals`      | land classification lines    | `classifications`  |
//! | `other_improvements`   | improvement lines            | `improvement_kinds`|
//! | `property_assessments` | assessed actual-use lines    | `improvement_kinds`|

use crate::recalc::schema::{
    AggregateSpec, CollectionSchema, Combine, FieldSpec, RecordSchema,
};

pub const OWNERS: &str = "owners";
pub const LAND_APPRAISALS: &str = "land_appraisals";
pub const OTHER_IMPROVEMENTS: &str = "other_improvements";
pub const PROPERTY_ASSESSMENTS: &str = "property_assessments";

pub const OWNER_DIRECTORY: &str = "owner_directory";
pub const CLASSIFICATIONS: &str = "classifications";
pub const IMPROVEMENT_KINDS: &str = "improvement_kinds";

fn product(left: &str, right: &str) -> Combine {
    Combine::Product {
        left: left.to_string(),
        right: right.to_string(),
    }
}

fn difference(minuend: &str, subtrahend: &str) -> Combine {
    Combine::Difference {
        minuend: minuend.to_string(),
        subtrahend: subtrahend.to_string(),
    }
}

fn percent_of(base: &str, percent: &str) -> Combine {
    Combine::PercentOf {
        base: base.to_string(),
        percent: percent.to_string(),
    }
}

fn owners() -> CollectionSchema {
    CollectionSchema::new(
        OWNERS,
        vec![
            FieldSpec::selection(
                "owner_select",
                OWNER_DIRECTORY,
                &[
                    ("name", "name"),
                    ("address", "address"),
                    ("contact", "contact"),
                    ("tin", "tin"),
                ],
            ),
            FieldSpec::text("name"),
            FieldSpec::text("address"),
            FieldSpec::text("contact"),
            FieldSpec::text("tin"),
        ],
    )
}

fn land_appraisals() -> CollectionSchema {
    CollectionSchema::new(
        LAND_APPRAISALS,
        vec![
            FieldSpec::selection(
                "classification_select",
                CLASSIFICATIONS,
                &[
                    ("classification", "classification"),
                    ("sub_classification", "sub_classification"),
                    ("unit_value", "unit_value"),
                ],
            ),
            FieldSpec::text("classification"),
            FieldSpec::text("sub_classification"),
            FieldSpec::numeric("area"),
            FieldSpec::numeric("unit_value"),
            FieldSpec::derived("base_market_value", product("area", "unit_value")),
            // Market-value adjustment chain, edited on its own screen but
            // living on the same rows.
            FieldSpec::text("adjustment_factors"),
            FieldSpec::numeric("percent_adjustment"),
            FieldSpec::derived(
                "value_adjustment",
                percent_of("base_market_value", "percent_adjustment"),
            ),
            FieldSpec::derived(
                "market_value",
                difference("base_market_value", "value_adjustment"),
            ),
        ],
    )
}

fn other_improvements() -> CollectionSchema {
    CollectionSchema::new(
        OTHER_IMPROVEMENTS,
        vec![
            FieldSpec::selection(
                "kind_select",
                IMPROVEMENT_KINDS,
                &[("kind", "kind"), ("unit_value", "unit_value")],
            ),
            FieldSpec::text("kind"),
            FieldSpec::numeric("quantity"),
            FieldSpec::numeric("unit_value"),
            FieldSpec::derived("base_market_value", product("quantity", "unit_value")),
            FieldSpec::text("adjustment_factors"),
            FieldSpec::numeric("percent_adjustment"),
            FieldSpec::derived(
                "value_adjustment",
                percent_of("base_market_value", "percent_adjustment"),
            ),
            FieldSpec::derived(
                "market_value",
                difference("base_market_value", "value_adjustment"),
            ),
        ],
    )
}

fn property_assessments() -> CollectionSchema {
    CollectionSchema::new(
        PROPERTY_ASSESSMENTS,
        vec![
            FieldSpec::selection(
                "actual_use_select",
                IMPROVEMENT_KINDS,
                &[("kind", "actual_use"), ("unit_value", "assessment_level")],
            ),
            FieldSpec::text("actual_use"),
            FieldSpec::numeric("market_value"),
            FieldSpec::numeric("assessment_level"),
            FieldSpec::derived(
                "assessed_value",
                product("market_value", "assessment_level"),
            ),
        ],
    )
}

/// Builds the full assessment record schema.
///
/// The result always validates; [`crate::recalc::RecalcEngine::new`]
/// accepts it directly.
pub fn assessment_schema() -> RecordSchema {
    RecordSchema::new(
        vec![
            owners(),
            land_appraisals(),
            other_improvements(),
            property_assessments(),
        ],
        vec![
            AggregateSpec::new("total_area", "area", &[LAND_APPRAISALS]),
            AggregateSpec::new(
                "total_land_base_market_value",
                "base_market_value",
                &[LAND_APPRAISALS],
            ),
            AggregateSpec::new("total_improvement_quantity", "quantity", &[OTHER_IMPROVEMENTS]),
            AggregateSpec::new(
                "total_improvement_base_market_value",
                "base_market_value",
                &[OTHER_IMPROVEMENTS],
            ),
            // Market-value screen totals run across land and improvements
            // together.
            AggregateSpec::new(
                "total_base_market_value",
                "base_market_value",
                &[LAND_APPRAISALS, OTHER_IMPROVEMENTS],
            ),
            AggregateSpec::new(
                "total_percent_adjustment",
                "percent_adjustment",
                &[LAND_APPRAISALS, OTHER_IMPROVEMENTS],
            ),
            AggregateSpec::new(
                "total_value_adjustment",
                "value_adjustment",
                &[LAND_APPRAISALS, OTHER_IMPROVEMENTS],
            ),
            AggregateSpec::new(
                "total_assessment_market_value",
                "market_value",
                &[PROPERTY_ASSESSMENTS],
            ),
            AggregateSpec::new(
                "total_assessed_value",
                "assessed_value",
                &[PROPERTY_ASSESSMENTS],
            ),
        ],
    )
}
