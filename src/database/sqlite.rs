use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Number, Value};
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Column, Row, Sqlite, SqlitePool, TypeInfo, ValueRef};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{
    CompanyStore, FilingArchive, FilingRecord, GatewayError, LogWrite, COMPANIES_TABLE,
    COMPANY_FILINGS_TABLE, ENRICHMENT_LOGS_TABLE,
};
use crate::models::{Company, EnrichmentLogEntry, FieldValue, KNOWN_COLUMNS, NAME_COLUMN, TICKER_COLUMN};

const DEFAULT_PAGE_SIZE: usize = 10;
const EXTENSION_TYPES: &[&str] = &["TEXT", "REAL", "INTEGER", "NUMERIC", "BLOB"];

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// Company datastore backed by a SQLite file
#[derive(Debug, Clone)]
pub struct SqliteCompanyStore {
    pool: SqlitePool,
    page_size: usize,
    /// Columns of the company table, read from `PRAGMA table_info`
    columns: Arc<RwLock<HashSet<String>>>,
}

impl SqliteCompanyStore {
    /// Open (creating if needed) the datastore and make sure every table exists
    pub async fn connect(database_url: &str) -> Result<Self, GatewayError> {
        let options = if database_url.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(database_url).map_err(|e| GatewayError::Unreachable(e.to_string()))?
        } else {
            SqliteConnectOptions::new().filename(database_url)
        };
        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // Every connection to an in-memory database is a separate database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        info!("Connecting to database: {}", database_url);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;

        let store = Self {
            pool,
            page_size: DEFAULT_PAGE_SIZE,
            columns: Arc::new(RwLock::new(HashSet::new())),
        };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Rows fetched per query when reading the company table
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    async fn ensure_schema(&self) -> Result<(), GatewayError> {
        let known_columns: String = KNOWN_COLUMNS
            .iter()
            .map(|(name, sql_type)| format!("    {} {},\n", name, sql_type))
            .collect();
        let companies = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {} TEXT PRIMARY KEY,\n    {} TEXT,\n{}    last_enriched TEXT\n)",
            COMPANIES_TABLE, TICKER_COLUMN, NAME_COLUMN, known_columns
        );
        sqlx::query(&companies).execute(&self.pool).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS enrichment_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticker TEXT NOT NULL,
                error TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                enricher TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS company_filings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticker TEXT NOT NULL,
                form_type TEXT NOT NULL,
                filing_date DATE NOT NULL,
                accession_number TEXT NOT NULL,
                filing_url TEXT NOT NULL,
                document_url TEXT,
                metadata TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(ticker, accession_number)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Tables created by an older schema may lack newer provider columns
        let existing = self.load_columns().await?;
        for (name, sql_type) in KNOWN_COLUMNS {
            if !existing.contains(*name) {
                info!("Adding missing column {} to {}", name, COMPANIES_TABLE);
                let sql = format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    COMPANIES_TABLE,
                    quote_identifier(name),
                    sql_type
                );
                sqlx::query(&sql).execute(&self.pool).await?;
            }
        }

        self.refresh_columns().await?;
        info!("Database schema ready");
        Ok(())
    }

    async fn load_columns(&self) -> Result<HashSet<String>, GatewayError> {
        let rows = sqlx::query(&format!("PRAGMA table_info({})", COMPANIES_TABLE))
            .fetch_all(&self.pool)
            .await?;
        let mut columns = HashSet::with_capacity(rows.len());
        for row in rows {
            columns.insert(row.try_get::<String, _>("name")?);
        }
        Ok(columns)
    }

    async fn refresh_columns(&self) -> Result<(), GatewayError> {
        let columns = self.load_columns().await?;
        debug!("Company table has {} columns", columns.len());
        *self.columns.write().await = columns;
        Ok(())
    }

    /// Add a provider-specific column to the company table.
    ///
    /// Adding a column that already exists is a no-op.
    pub async fn add_extension_column(&self, name: &str, sql_type: &str) -> Result<(), GatewayError> {
        let sql_type = sql_type.trim().to_uppercase();
        if !is_valid_identifier(name) || !EXTENSION_TYPES.contains(&sql_type.as_str()) {
            return Err(GatewayError::InvalidColumn(format!("{} {}", name, sql_type)));
        }
        if self.columns.read().await.contains(name) {
            return Ok(());
        }

        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            COMPANIES_TABLE,
            quote_identifier(name),
            sql_type
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| classify(COMPANIES_TABLE, e))?;
        info!("➕ Added extension column {} ({})", name, sql_type);

        self.refresh_columns().await
    }

    /// Insert companies by ticker, refreshing the name of existing rows
    pub async fn upsert_companies(&self, companies: &[Company]) -> Result<usize, GatewayError> {
        let mut tx = self.pool.begin().await?;
        let mut upserted = 0;

        for company in companies {
            let Some(ticker) = company.ticker() else {
                warn!("Skipping company without ticker: {:?}", company.name);
                continue;
            };
            sqlx::query(
                r#"
                INSERT INTO companies (ticker, name)
                VALUES (?, ?)
                ON CONFLICT(ticker) DO UPDATE SET
                    name = COALESCE(excluded.name, companies.name)
                "#,
            )
            .bind(ticker)
            .bind(company.name.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(|e| classify(COMPANIES_TABLE, e))?;
            upserted += 1;
        }

        tx.commit().await?;
        info!("💾 Upserted {} companies", upserted);
        Ok(upserted)
    }

    /// Explicit select list for the company table.
    ///
    /// `SELECT *` would reuse a prepared statement whose column metadata
    /// predates an `ALTER TABLE`.
    async fn select_list(&self) -> String {
        let known = self.columns.read().await;
        let mut names: Vec<&String> = known.iter().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| quote_identifier(name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    async fn check_columns(&self, columns: &[(String, FieldValue)]) -> Result<(), GatewayError> {
        let known = self.columns.read().await;
        match columns.iter().find(|(name, _)| !known.contains(name)) {
            Some((name, _)) => Err(GatewayError::UnknownColumn {
                table: COMPANIES_TABLE.to_string(),
                column: name.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CompanyStore for SqliteCompanyStore {
    async fn fetch_companies(&self, limit: Option<usize>) -> Result<Vec<Company>, GatewayError> {
        let mut companies = Vec::new();
        let sql = format!(
            "SELECT {} FROM {} ORDER BY rowid LIMIT ? OFFSET ?",
            self.select_list().await,
            COMPANIES_TABLE
        );

        loop {
            let remaining = limit.map(|limit| limit.saturating_sub(companies.len()));
            let page = remaining.map_or(self.page_size, |remaining| remaining.min(self.page_size));
            if page == 0 {
                break;
            }

            let rows = sqlx::query(&sql)
                .bind(page as i64)
                .bind(companies.len() as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| classify(COMPANIES_TABLE, e))?;

            let fetched = rows.len();
            for row in &rows {
                companies.push(decode_company(row)?);
            }
            if fetched < page {
                break;
            }
        }

        info!("📊 Fetched {} companies", companies.len());
        Ok(companies)
    }

    async fn update_company(&self, ticker: &str, columns: &[(String, FieldValue)]) -> Result<(), GatewayError> {
        if columns.is_empty() {
            return Ok(());
        }
        self.check_columns(columns).await?;

        let assignments: Vec<String> = columns
            .iter()
            .map(|(name, _)| format!("{} = ?", quote_identifier(name)))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            COMPANIES_TABLE,
            assignments.join(", "),
            TICKER_COLUMN
        );

        let mut query = sqlx::query(&sql);
        for (_, value) in columns {
            query = bind_value(query, value);
        }
        let result = query
            .bind(ticker)
            .execute(&self.pool)
            .await
            .map_err(|e| classify(COMPANIES_TABLE, e))?;

        if result.rows_affected() == 0 {
            return Err(GatewayError::RowMissing(ticker.to_string()));
        }
        debug!("Updated {} columns for {}", columns.len(), ticker);
        Ok(())
    }

    async fn append_enrichment_log(&self, entry: &EnrichmentLogEntry) -> Result<LogWrite, GatewayError> {
        let result = sqlx::query(
            "INSERT INTO enrichment_logs (ticker, error, timestamp, enricher) VALUES (?, ?, ?, ?)",
        )
        .bind(&entry.ticker)
        .bind(&entry.error)
        .bind(entry.timestamp.to_rfc3339())
        .bind(&entry.source)
        .execute(&self.pool)
        .await;

        match result.map_err(|e| classify(ENRICHMENT_LOGS_TABLE, e)) {
            Ok(_) => Ok(LogWrite::Written),
            Err(GatewayError::TableMissing(_)) => Ok(LogWrite::TableMissing),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl FilingArchive for SqliteCompanyStore {
    async fn archive_filings(&self, ticker: &str, filings: &[FilingRecord]) -> Result<usize, GatewayError> {
        let created_at = Utc::now().to_rfc3339();
        let mut stored = 0;

        for filing in filings {
            sqlx::query(
                r#"
                INSERT INTO company_filings
                    (ticker, form_type, filing_date, accession_number, filing_url, document_url, metadata, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(ticker, accession_number) DO UPDATE SET
                    form_type = excluded.form_type,
                    filing_date = excluded.filing_date,
                    filing_url = excluded.filing_url,
                    document_url = excluded.document_url,
                    metadata = excluded.metadata
                "#,
            )
            .bind(ticker)
            .bind(&filing.form_type)
            .bind(filing.filing_date)
            .bind(&filing.accession_number)
            .bind(&filing.filing_url)
            .bind(filing.document_url.as_deref())
            .bind(filing.metadata.to_string())
            .bind(&created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| classify(COMPANY_FILINGS_TABLE, e))?;
            stored += 1;
        }

        Ok(stored)
    }
}

/// Map a sqlx error to the gateway taxonomy
fn classify(table: &str, error: sqlx::Error) -> GatewayError {
    let missing_table = matches!(
        &error,
        sqlx::Error::Database(db) if db.message().contains("no such table")
    );
    if missing_table {
        return GatewayError::TableMissing(table.to_string());
    }
    if matches!(error, sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)) {
        return GatewayError::Unreachable(error.to_string());
    }
    GatewayError::Query(error)
}

fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn bind_value<'q>(query: SqliteQuery<'q>, value: &FieldValue) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(flag) => query.bind(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(int) => query.bind(int),
            None => query.bind(number.as_f64()),
        },
        Value::String(text) => query.bind(text.clone()),
        // Arrays and objects are stored as JSON text
        other => query.bind(other.to_string()),
    }
}

fn decode_company(row: &SqliteRow) -> Result<Company, GatewayError> {
    let mut company = Company::default();

    for column in row.columns() {
        let value = decode_value(row, column.ordinal())?;
        match column.name() {
            TICKER_COLUMN => company.ticker = value.as_str().map(str::to_string),
            NAME_COLUMN => company.name = value.as_str().map(str::to_string),
            _ if value.is_null() => {}
            name => {
                company.fields.insert(name.to_string(), value);
            }
        }
    }

    Ok(company)
}

/// Decode one cell by its runtime storage class
fn decode_value(row: &SqliteRow, index: usize) -> Result<Value, GatewayError> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage_class = raw.type_info().name().to_uppercase();

    let value = match storage_class.as_str() {
        "INTEGER" | "BOOLEAN" => Value::from(row.try_get_unchecked::<i64, _>(index)?),
        "REAL" | "NUMERIC" => Number::from_f64(row.try_get_unchecked::<f64, _>(index)?)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "BLOB" => Value::Null,
        _ => {
            let text = row.try_get_unchecked::<String, _>(index)?;
            decode_json_text(text)
        }
    };
    Ok(value)
}

fn decode_json_text(text: String) -> Value {
    let looks_like_json = matches!(text.trim_start().chars().next(), Some('[') | Some('{'));
    if looks_like_json {
        if let Ok(value) = serde_json::from_str::<Value>(&text) {
            return value;
        }
    }
    Value::String(text)
}
