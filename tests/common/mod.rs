//! Common test utilities and helpers

pub mod enrichers;
pub mod stores;

pub use archives::RecordingArchive;
pub use enrichers::{FailingEnricher, StubEnricher};
pub use stores::RecordingStore;

/// Test data utilities
pub mod test_data {
    use equity_pipeline::models::Company;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Companies keyed only by ticker, as a fresh import would leave them
    pub fn companies(tickers: &[&str]) -> Vec<Company> {
        tickers.iter().map(|ticker| Company::new(ticker)).collect()
    }

    /// Company row as exported from a terminal, with exchange suffix and name
    pub fn terminal_company(ticker: &str, name: &str) -> Company {
        Company::new(ticker).with_name(name)
    }

    /// Throwaway directory holding a SQLite file path
    pub fn temp_database() -> (TempDir, String) {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("equity_pipeline_test.db");
        let url = path.to_str().expect("temp path is not UTF-8").to_string();
        (dir, url)
    }

    /// Write a company CSV export next to the database
    pub fn write_csv(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("companies.csv");
        std::fs::write(&path, contents).expect("Failed to write CSV");
        path
    }
}

/// Logging utilities for tests
pub mod logging {
    use std::sync::Once;
    use tracing::{debug, info};

    static INIT: Once = Once::new();

    /// Initialize test logging
    pub fn init_test_logging() {
        INIT.call_once(|| {
            // test-log may already have installed a subscriber
            let _ = tracing::subscriber::set_global_default(
                tracing_subscriber::fmt()
                    .with_env_filter("equity_pipeline=debug,main=debug")
                    .with_test_writer()
                    .finish(),
            );
        });
    }

    /// Log test step
    pub fn log_test_step(step: &str) {
        info!("🧪 Test Step: {}", step);
    }

    /// Log test data
    pub fn log_test_data<T: std::fmt::Debug>(label: &str, data: &T) {
        debug!("📊 {}: {:?}", label, data);
    }
}
