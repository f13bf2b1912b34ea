//! Execution of ingest statements against the backing store.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::ddl::Statement;
use crate::error::StatementPhase;
use crate::{Error, Result};

/// Per-query ClickHouse settings.
pub type QuerySettings = BTreeMap<String, String>;

const MAX_ERROR_LOGS: u64 = 50;
const FULL_QUERY_THRESHOLD: u64 = 5;
const MAX_QUERY_LENGTH: usize = 100;
const SUMMARY_INTERVAL: u64 = 1000;

/// Settings sent with every ingest statement.
pub fn insert_settings(async_insert: bool) -> QuerySettings {
    let mut settings = QuerySettings::new();
    settings.insert("date_time_input_format".into(), "best_effort".into());
    if async_insert {
        for (key, value) in [
            ("async_insert", "1"),
            ("wait_for_async_insert", "1"),
            ("async_insert_busy_timeout_ms", "100"),
            ("async_insert_max_data_size", "50000000"),
            ("async_insert_max_query_number", "10000"),
        ] {
            settings.insert(key.to_string(), value.to_string());
        }
    }
    settings
}

/// Executes SQL against a backend
#[async_trait]
pub trait BackendExecutor: Send + Sync {
    async fn exec(&self, query: &str, settings: &QuerySettings) -> Result<()>;

    fn backend_name(&self) -> &'static str;
}

/// Statement as received by [`RecordingExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedStatement {
    pub sql: String,
    pub settings: QuerySettings,
}

/// Keeps executed statements in memory. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    statements: Mutex<Vec<RecordedStatement>>,
    fail_when_contains: Mutex<Option<String>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every statement containing `needle`; `None` clears it.
    pub fn fail_when_contains(&self, needle: Option<&str>) {
        *self.fail_when_contains.lock() = needle.map(str::to_string);
    }

    pub fn statements(&self) -> Vec<RecordedStatement> {
        self.statements.lock().clone()
    }

    pub fn sql(&self) -> Vec<String> {
        self.statements.lock().iter().map(|s| s.sql.clone()).collect()
    }

    pub fn clear(&self) {
        self.statements.lock().clear();
    }
}

#[async_trait]
impl BackendExecutor for RecordingExecutor {
    async fn exec(&self, query: &str, settings: &QuerySettings) -> Result<()> {
        if let Some(needle) = self.fail_when_contains.lock().as_deref() {
            if query.contains(needle) {
                return Err(Error::Backend(format!("statement rejected: {}", needle)));
            }
        }
        self.statements.lock().push(RecordedStatement {
            sql: query.to_string(),
            settings: settings.clone(),
        });
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "recording"
    }
}

fn truncate(query: &str, max: usize) -> String {
    match query.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &query[..idx]),
        None => query.to_string(),
    }
}

/// Runs statement batches in order and stops at the first failure.
pub struct StatementRunner {
    executor: Arc<dyn BackendExecutor>,
    sql_tracing: bool,
    error_count: AtomicU64,
}

impl StatementRunner {
    pub fn new(executor: Arc<dyn BackendExecutor>, sql_tracing: bool) -> Self {
        Self {
            executor,
            sql_tracing,
            error_count: AtomicU64::new(0),
        }
    }

    pub fn executor(&self) -> &Arc<dyn BackendExecutor> {
        &self.executor
    }

    /// Errors seen since the runner was created.
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub async fn run(&self, statements: &[Statement], settings: &QuerySettings) -> Result<()> {
        for statement in statements {
            let sql = statement.to_sql();
            if self.sql_tracing && statement.is_ddl() {
                tracing::info!("DDL query execution: {}", sql);
            }
            let phase = statement.phase();
            metrics::counter!(
                "gantry_ingest_statements_total",
                "phase" => phase.to_string(),
                "backend" => self.executor.backend_name()
            )
            .increment(1);

            if let Err(e) = self.executor.exec(&sql, settings).await {
                metrics::counter!("gantry_ingest_statement_errors_total", "phase" => phase.to_string())
                    .increment(1);
                self.log_failure(phase, &sql, &e);
                return Err(Error::Execution {
                    phase,
                    message: e.to_string(),
                });
            }
        }
        Ok(())
    }

    fn log_failure(&self, phase: StatementPhase, sql: &str, error: &Error) {
        if phase == StatementPhase::Create {
            tracing::error!("error executing DDL: {}: {}", sql, error);
        }
        let count = self.error_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count < MAX_ERROR_LOGS {
            let query = if count > FULL_QUERY_THRESHOLD {
                truncate(sql, MAX_QUERY_LENGTH)
            } else {
                sql.to_string()
            };
            tracing::error!("error executing ingest statement: {}, query: {}", error, query);
        } else if count % SUMMARY_INTERVAL == 0 {
            tracing::error!(
                "got {} total errors executing ingest statements. last error: {}, last query: {}",
                count,
                error,
                truncate(sql, MAX_QUERY_LENGTH)
            );
        }
    }
}
