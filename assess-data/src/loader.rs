use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;

use thiserror::Error;

use assess_core::{AssessmentRepository, ReferenceList, ReferenceOption, RepositoryError};

/// Errors that can occur when loading reference-catalog data.
#[derive(Debug, Error)]
pub enum CatalogLoaderError {
    #[error("CSV parse error: {0}")]
    CsvParse(String),

    #[error("CSV has no '{0}' column to key the catalog by")]
    MissingKeyColumn(String),

    #[error("empty key value on line {0}")]
    EmptyKey(usize),

    #[error("duplicate key '{0}'")]
    DuplicateKey(String),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl From<csv::Error> for CatalogLoaderError {
    fn from(err: csv::Error) -> Self {
        CatalogLoaderError::CsvParse(err.to_string())
    }
}

/// Loads reference catalogs from CSV.
///
/// The CSV's header row names the option fields; every data row becomes
/// one option. `key_field` names the column the catalog is keyed by
/// (the column an editor matches a picked value against), so it must be
/// present, non-empty and unique on every row.
///
/// ```csv
/// kind,unit_value
/// Fence,50
/// Shed,200
/// ```
pub struct CatalogLoader;

impl CatalogLoader {
    /// Parses CSV data into a [`ReferenceList`] keyed by `key_field`.
    ///
    /// Cell values are trimmed. Row order is preserved; it is the order
    /// pickers display.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogLoaderError`] on malformed CSV, a missing key
    /// column, or an empty or duplicate key value.
    pub fn parse<R: Read>(reader: R, key_field: &str) -> Result<ReferenceList, CatalogLoaderError> {
        let mut csv_reader = csv::Reader::from_reader(reader);

        let headers: Vec<String> = csv_reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if !headers.iter().any(|h| h == key_field) {
            return Err(CatalogLoaderError::MissingKeyColumn(key_field.to_string()));
        }

        let mut options = Vec::new();
        let mut seen_keys = BTreeSet::new();
        for (index, result) in csv_reader.records().enumerate() {
            let record = result?;
            let values: BTreeMap<String, String> = headers
                .iter()
                .zip(record.iter())
                .map(|(header, value)| (header.clone(), value.trim().to_string()))
                .collect();

            let key = values.get(key_field).map(String::as_str).unwrap_or("");
            if key.is_empty() {
                // Line numbers are 1-based and include the header row.
                return Err(CatalogLoaderError::EmptyKey(index + 2));
            }
            if !seen_keys.insert(key.to_string()) {
                return Err(CatalogLoaderError::DuplicateKey(key.to_string()));
            }

            options.push(ReferenceOption { values });
        }

        Ok(ReferenceList::new(key_field, options))
    }

    /// Replaces the stored catalog with `list` and returns the number of
    /// options written.
    pub async fn load(
        repository: &dyn AssessmentRepository,
        catalog: &str,
        list: &ReferenceList,
    ) -> Result<usize, CatalogLoaderError> {
        repository.replace_reference_list(catalog, list).await?;
        Ok(list.options.len())
    }
}
