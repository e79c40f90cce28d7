use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::recalc::record::Record;

/// Identification fields from the basic-info form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyHeader {
    pub transaction_title: String,
    pub transaction_code: String,
    pub arp_no: String,
    pub pin: String,
    pub dated: Option<NaiveDate>,
    pub survey_no: String,
    pub lot_no: String,
    pub block_no: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyLocation {
    pub province_city: String,
    pub municipality: String,
    pub barangay_district: String,
    pub street: String,
}

/// Details of the assessment this record supersedes, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupersededAssessment {
    pub pin: String,
    pub arp_no: String,
    pub td_no: String,
    pub total_assessed_value: Option<Decimal>,
    pub previous_owner: String,
    pub effectivity: String,
    pub arp_page_no: String,
    pub dated: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    pub id: i64,
    pub header: PropertyHeader,
    pub location: PropertyLocation,
    pub superseded: SupersededAssessment,

    // Line-item collections and computed totals; kept consistent by the
    // recalculation engine, never edited directly.
    pub record: Record,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// For creating new assessments (no id or timestamps)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAssessment {
    pub header: PropertyHeader,
    pub location: PropertyLocation,
    pub superseded: SupersededAssessment,
    pub record: Record,
}
