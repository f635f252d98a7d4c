//! Environment-driven engine tuning shared by every connection.

use std::time::Duration;

use anyhow::{Context, Result};

/// Limits and timeouts applied by the translator, materializer and write path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Overrides every table's page size when set; still capped by the table maximum.
    pub page_size: Option<usize>,
    /// Deadline for a single adapter call. Elapsed calls fail with a connection error.
    pub call_timeout: Duration,
    /// Largest limit for which unsupported ordering is emulated client-side.
    pub max_client_sort_limit: usize,
    /// Upper bound on rows buffered for a client-side sort.
    pub max_buffered_rows: usize,
    /// Upper bound on identifiers resolved for one UPDATE/DELETE.
    pub max_mutation_rows: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            page_size: None,
            call_timeout: Duration::from_secs(30),
            max_client_sort_limit: 10_000,
            max_buffered_rows: 100_000,
            max_mutation_rows: 1_000,
        }
    }
}

impl EngineSettings {
    /// Reads `CONDUIT_*` variables, falling back to defaults for unset ones.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let page_size = match lookup("CONDUIT_PAGE_SIZE") {
            Some(raw) => Some(parse_usize(Some(raw), 0)?).filter(|size| *size > 0),
            None => None,
        };
        let call_timeout_ms = parse_u64(
            lookup("CONDUIT_CALL_TIMEOUT_MS"),
            defaults.call_timeout.as_millis() as u64,
        )?
        .max(1);
        let max_client_sort_limit = parse_usize(
            lookup("CONDUIT_MAX_CLIENT_SORT_LIMIT"),
            defaults.max_client_sort_limit,
        )?;
        let max_buffered_rows = parse_usize(
            lookup("CONDUIT_MAX_BUFFERED_ROWS"),
            defaults.max_buffered_rows,
        )?
        .max(1);
        let max_mutation_rows = parse_usize(
            lookup("CONDUIT_MAX_MUTATION_ROWS"),
            defaults.max_mutation_rows,
        )?
        .max(1);
        Ok(Self {
            page_size,
            call_timeout: Duration::from_millis(call_timeout_ms),
            max_client_sort_limit,
            max_buffered_rows,
            max_mutation_rows,
        })
    }

    /// Effective page size for a table with the given default and maximum.
    pub fn page_size_for(&self, table_default: usize, table_max: usize) -> usize {
        self.page_size
            .unwrap_or(table_default)
            .clamp(1, table_max.max(1))
    }
}

/// Parses an optional `usize` with fallback default.
fn parse_usize(value: Option<String>, default_value: usize) -> Result<usize> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .with_context(|| format!("invalid usize value: {raw}")),
        None => Ok(default_value),
    }
}

/// Parses an optional `u64` with fallback default.
fn parse_u64(value: Option<String>, default_value: u64) -> Result<u64> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid u64 value: {raw}")),
        None => Ok(default_value),
    }
}
