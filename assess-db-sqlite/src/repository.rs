use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, sqlite::SqlitePool};
use tracing::debug;
use uuid::Uuid;

use assess_core::recalc::record::{FieldValue, Record, Row};
use assess_core::{
    Assessment, AssessmentRepository, NewAssessment, PropertyHeader, PropertyLocation,
    ReferenceList, ReferenceOption, RepositoryError, SupersededAssessment,
};

pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub async fn new(database_url: &str) -> Result<Self, RepositoryError> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| RepositoryError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn new_with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<(), RepositoryError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }

    /// Executes every `.sql` file in `seeds_dir`, in alphabetical order
    /// by filename.
    pub async fn run_seeds(&self, seeds_dir: &Path) -> Result<(), RepositoryError> {
        let mut entries: Vec<_> = std::fs::read_dir(seeds_dir)
            .map_err(|e| {
                RepositoryError::Configuration(format!(
                    "cannot read seeds directory '{}': {}",
                    seeds_dir.display(),
                    e
                ))
            })?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "sql"))
            .collect();

        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let path = entry.path();
            debug!(file = %path.display(), "executing seed file");
            let sql = std::fs::read_to_string(&path).map_err(|e| {
                RepositoryError::Configuration(format!(
                    "cannot read seed file '{}': {}",
                    path.display(),
                    e
                ))
            })?;

            sqlx::raw_sql(&sql)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    RepositoryError::Database(format!(
                        "seed file '{}' failed: {}",
                        path.display(),
                        e
                    ))
                })?;
        }

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn insert_rows(
        &self,
        assessment_id: i64,
        record: &Record,
    ) -> Result<(), RepositoryError> {
        for (collection_name, collection) in &record.collections {
            for (position, row) in collection.rows.iter().enumerate() {
                let fields = serde_json::to_string(&row.values)
                    .map_err(|e| RepositoryError::Database(e.to_string()))?;
                sqlx::query(
                    "INSERT INTO assessment_row (row_id, assessment_id, collection, position, fields)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(row.id.as_uuid().to_string())
                .bind(assessment_id)
                .bind(collection_name)
                .bind(position as i64)
                .bind(fields)
                .execute(&self.pool)
                .await
                .map_err(|e| RepositoryError::Database(e.to_string()))?;
            }
        }
        Ok(())
    }

    async fn load_record(&self, assessment_id: i64) -> Result<Record, RepositoryError> {
        let rows: Vec<AssessmentLineRow> = sqlx::query_as(
            "SELECT row_id, collection, fields
             FROM assessment_row
             WHERE assessment_id = ?
             ORDER BY collection, position",
        )
        .bind(assessment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        let mut record = Record::new();
        for line in rows {
            let id = Uuid::parse_str(&line.row_id)
                .map_err(|e| {
                    RepositoryError::Database(format!("Invalid row id '{}': {}", line.row_id, e))
                })?
                .into();
            let values: BTreeMap<String, FieldValue> = serde_json::from_str(&line.fields)
                .map_err(|e| RepositoryError::Database(e.to_string()))?;
            record
                .collection_mut(&line.collection)
                .rows
                .push(Row { id, values });
        }
        Ok(record)
    }
}

#[derive(FromRow)]
struct AssessmentHeaderRow {
    id: i64,
    transaction_title: String,
    transaction_code: String,
    arp_no: String,
    pin: String,
    dated: Option<String>,
    survey_no: String,
    lot_no: String,
    block_no: String,
    province_city: String,
    municipality: String,
    barangay_district: String,
    street: String,
    superseded_pin: String,
    superseded_arp_no: String,
    superseded_td_no: String,
    superseded_total_assessed_value: Option<String>,
    superseded_previous_owner: String,
    superseded_effectivity: String,
    superseded_arp_page_no: String,
    superseded_dated: Option<String>,
    created_at: String,
    updated_at: String,
}

impl AssessmentHeaderRow {
    /// Collections are loaded separately; `record` starts empty here.
    fn into_assessment(self) -> Result<Assessment, RepositoryError> {
        Ok(Assessment {
            id: self.id,
            header: PropertyHeader {
                transaction_title: self.transaction_title,
                transaction_code: self.transaction_code,
                arp_no: self.arp_no,
                pin: self.pin,
                dated: parse_optional_date(&self.dated)?,
                survey_no: self.survey_no,
                lot_no: self.lot_no,
                block_no: self.block_no,
            },
            location: PropertyLocation {
                province_city: self.province_city,
                municipality: self.municipality,
                barangay_district: self.barangay_district,
                street: self.street,
            },
            superseded: SupersededAssessment {
                pin: self.superseded_pin,
                arp_no: self.superseded_arp_no,
                td_no: self.superseded_td_no,
                total_assessed_value: parse_optional_decimal(
                    &self.superseded_total_assessed_value,
                )?,
                previous_owner: self.superseded_previous_owner,
                effectivity: self.superseded_effectivity,
                arp_page_no: self.superseded_arp_page_no,
                dated: parse_optional_date(&self.superseded_dated)?,
            },
            record: Record::new(),
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

#[derive(FromRow)]
struct AssessmentLineRow {
    row_id: String,
    collection: String,
    fields: String,
}

#[derive(FromRow)]
struct ReferenceOptionRow {
    fields: String,
}

fn parse_decimal(s: &str) -> Result<Decimal, RepositoryError> {
    s.parse::<Decimal>()
        .map_err(|e| RepositoryError::Database(format!("Failed to parse decimal '{}': {}", s, e)))
}

fn parse_optional_decimal(s: &Option<String>) -> Result<Option<Decimal>, RepositoryError> {
    s.as_ref().map(|s| parse_decimal(s)).transpose()
}

fn parse_optional_date(s: &Option<String>) -> Result<Option<NaiveDate>, RepositoryError> {
    s.as_ref()
        .map(|s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| {
                RepositoryError::Database(format!("Failed to parse date '{}': {}", s, e))
            })
        })
        .transpose()
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    // SQLite stores timestamps in various formats, try common ones
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|e| RepositoryError::Database(format!("Failed to parse datetime '{}': {}", s, e)))
}

#[async_trait]
impl AssessmentRepository for SqliteRepository {
    async fn create_assessment(
        &self,
        assessment: NewAssessment,
    ) -> Result<Assessment, RepositoryError> {
        let now = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();

        let result = sqlx::query(
            "INSERT INTO assessment (
                transaction_title, transaction_code, arp_no, pin, dated,
                survey_no, lot_no, block_no,
                province_city, municipality, barangay_district, street,
                superseded_pin, superseded_arp_no, superseded_td_no,
                superseded_total_assessed_value, superseded_previous_owner,
                superseded_effectivity, superseded_arp_page_no, superseded_dated,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&assessment.header.transaction_title)
        .bind(&assessment.header.transaction_code)
        .bind(&assessment.header.arp_no)
        .bind(&assessment.header.pin)
        .bind(assessment.header.dated.map(|d| d.to_string()))
        .bind(&assessment.header.survey_no)
        .bind(&assessment.header.lot_no)
        .bind(&assessment.header.block_no)
        .bind(&assessment.location.province_city)
        .bind(&assessment.location.municipality)
        .bind(&assessment.location.barangay_district)
        .bind(&assessment.location.street)
        .bind(&assessment.superseded.pin)
        .bind(&assessment.superseded.arp_no)
        .bind(&assessment.superseded.td_no)
        .bind(assessment.superseded.total_assessed_value.map(|d| d.to_string()))
        .bind(&assessment.superseded.previous_owner)
        .bind(&assessment.superseded.effectivity)
        .bind(&assessment.superseded.arp_page_no)
        .bind(assessment.superseded.dated.map(|d| d.to_string()))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        let id = result.last_insert_rowid();
        self.insert_rows(id, &assessment.record).await?;
        self.get_assessment(id).await
    }

    async fn get_assessment(&self, id: i64) -> Result<Assessment, RepositoryError> {
        let row: AssessmentHeaderRow = sqlx::query_as(
            "SELECT id, transaction_title, transaction_code, arp_no, pin, dated,
                    survey_no, lot_no, block_no,
                    province_city, municipality, barangay_district, street,
                    superseded_pin, superseded_arp_no, superseded_td_no,
                    superseded_total_assessed_value, superseded_previous_owner,
                    superseded_effectivity, superseded_arp_page_no, superseded_dated,
                    created_at, updated_at
             FROM assessment WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?
        .ok_or(RepositoryError::NotFound)?;

        let mut assessment = row.into_assessment()?;
        assessment.record = self.load_record(id).await?;
        Ok(assessment)
    }

    async fn update_assessment(&self, assessment: &Assessment) -> Result<(), RepositoryError> {
        let now = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();

        let result = sqlx::query(
            "UPDATE assessment SET
                transaction_title = ?, transaction_code = ?, arp_no = ?, pin = ?, dated = ?,
                survey_no = ?, lot_no = ?, block_no = ?,
                province_city = ?, municipality = ?, barangay_district = ?, street = ?,
                superseded_pin = ?, superseded_arp_no = ?, superseded_td_no = ?,
                superseded_total_assessed_value = ?, superseded_previous_owner = ?,
                superseded_effectivity = ?, superseded_arp_page_no = ?, superseded_dated = ?,
                updated_at = ?
             WHERE id = ?",
        )
        .bind(&assessment.header.transaction_title)
        .bind(&assessment.header.transaction_code)
        .bind(&assessment.header.arp_no)
        .bind(&assessment.header.pin)
        .bind(assessment.header.dated.map(|d| d.to_string()))
        .bind(&assessment.header.survey_no)
        .bind(&assessment.header.lot_no)
        .bind(&assessment.header.block_no)
        .bind(&assessment.location.province_city)
        .bind(&assessment.location.municipality)
        .bind(&assessment.location.barangay_district)
        .bind(&assessment.location.street)
        .bind(&assessment.superseded.pin)
        .bind(&assessment.superseded.arp_no)
        .bind(&assessment.superseded.td_no)
        .bind(assessment.superseded.total_assessed_value.map(|d| d.to_string()))
        .bind(&assessment.superseded.previous_owner)
        .bind(&assessment.superseded.effectivity)
        .bind(&assessment.superseded.arp_page_no)
        .bind(assessment.superseded.dated.map(|d| d.to_string()))
        .bind(&now)
        .bind(assessment.id)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        sqlx::query("DELETE FROM assessment_row WHERE assessment_id = ?")
            .bind(assessment.id)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        self.insert_rows(assessment.id, &assessment.record).await?;

        Ok(())
    }

    async fn delete_assessment(&self, id: i64) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM assessment_row WHERE assessment_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        let result = sqlx::query("DELETE FROM assessment WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn list_assessments(&self) -> Result<Vec<Assessment>, RepositoryError> {
        let ids: Vec<(i64,)> = sqlx::query_as("SELECT id FROM assessment ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        let mut assessments = Vec::with_capacity(ids.len());
        for (id,) in ids {
            assessments.push(self.get_assessment(id).await?);
        }
        Ok(assessments)
    }

    async fn get_reference_list(&self, catalog: &str) -> Result<ReferenceList, RepositoryError> {
        let key_field: (String,) =
            sqlx::query_as("SELECT key_field FROM reference_catalog WHERE catalog = ?")
                .bind(catalog)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| RepositoryError::Database(e.to_string()))?
                .ok_or(RepositoryError::NotFound)?;

        let rows: Vec<ReferenceOptionRow> = sqlx::query_as(
            "SELECT fields FROM reference_option WHERE catalog = ? ORDER BY position",
        )
        .bind(catalog)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        let mut options = Vec::with_capacity(rows.len());
        for row in rows {
            let values: BTreeMap<String, String> = serde_json::from_str(&row.fields)
                .map_err(|e| RepositoryError::Database(e.to_string()))?;
            options.push(ReferenceOption { values });
        }

        Ok(ReferenceList {
            key_field: key_field.0,
            options,
        })
    }

    async fn replace_reference_list(
        &self,
        catalog: &str,
        list: &ReferenceList,
    ) -> Result<(), RepositoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        sqlx::query(
            "INSERT INTO reference_catalog (catalog, key_field) VALUES (?, ?)
             ON CONFLICT(catalog) DO UPDATE SET key_field = excluded.key_field",
        )
        .bind(catalog)
        .bind(&list.key_field)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        sqlx::query("DELETE FROM reference_option WHERE catalog = ?")
            .bind(catalog)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        for (position, option) in list.options.iter().enumerate() {
            let fields = serde_json::to_string(&option.values)
                .map_err(|e| RepositoryError::Database(e.to_string()))?;
            sqlx::query(
                "INSERT INTO reference_option (catalog, position, option_key, fields)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(catalog)
            .bind(position as i64)
            .bind(option.value(&list.key_field))
            .bind(fields)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }

    async fn list_catalogs(&self) -> Result<Vec<String>, RepositoryError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT catalog FROM reference_catalog ORDER BY catalog")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(|(catalog,)| catalog).collect())
    }
}
