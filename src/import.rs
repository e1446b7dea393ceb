//! Seed the company table from a CSV export.
//!
//! The file needs a `Ticker` column; the company name is taken from
//! `Name`, or from `Security` for terminal exports.

use csv::{ReaderBuilder, Trim};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

use crate::database::{GatewayError, SqliteCompanyStore};
use crate::models::Company;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("CSV file not found: {0}")]
    NotFound(String),
    #[error("Failed to parse CSV row {row}: {source}")]
    Row { row: usize, source: csv::Error },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Deserialize)]
struct CompanyRow {
    #[serde(rename = "Ticker", alias = "ticker")]
    ticker: Option<String>,
    #[serde(rename = "Name", alias = "name", default)]
    name: Option<String>,
    #[serde(rename = "Security", alias = "security", default)]
    security: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Parse companies from CSV, skipping rows without a ticker
pub fn read_companies<R: Read>(reader: R) -> Result<Vec<Company>, ImportError> {
    let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
    let mut companies = Vec::new();

    for (index, result) in rdr.deserialize::<CompanyRow>().enumerate() {
        // header is line 1
        let row_number = index + 2;
        let row = result.map_err(|source| ImportError::Row { row: row_number, source })?;

        let Some(ticker) = non_blank(row.ticker) else {
            warn!("Skipping CSV row {} without ticker", row_number);
            continue;
        };
        companies.push(Company {
            ticker: Some(ticker),
            name: non_blank(row.name).or_else(|| non_blank(row.security)),
            ..Company::default()
        });
    }

    Ok(companies)
}

/// Read `csv_path` and upsert every company into the store
pub async fn import_companies(store: &SqliteCompanyStore, csv_path: &Path) -> Result<usize, ImportError> {
    if !csv_path.exists() {
        return Err(ImportError::NotFound(csv_path.display().to_string()));
    }

    info!("📄 Reading companies from {}", csv_path.display());
    let file = std::fs::File::open(csv_path).map_err(csv::Error::from)?;
    let companies = read_companies(file)?;
    info!("Found {} companies", companies.len());

    Ok(store.upsert_companies(&companies).await?)
}
