use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables of the ranking core. Loaded once at startup; every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Capacity of the ranking stack.
    pub max_results_preparation: usize,
    /// Per-site deferral bucket capacity.
    pub double_domain_capacity: usize,
    /// Deferral bucket capacity for queries with special rights.
    pub double_domain_capacity_special: usize,
    pub event_ttl_ms: u64,
    /// Longest single wait of a result worker for the next candidate.
    pub take_timeout_ms: u64,
    pub worker_lifetime_ms: u64,
    pub max_workers: usize,
    /// Worker limit when the loader may not fetch online.
    pub offline_workers: usize,
    pub result_lookahead: usize,
    pub image_lookahead: usize,
    pub one_result_timeout_ms: u64,
    /// Score only after the whole batch has been normalized.
    pub strict_normalization: bool,
    /// Remove the word associations of documents whose snippet could not be verified.
    pub delete_if_snippet_fail: bool,
    /// `None` leaves the result list unbounded.
    pub result_capacity: Option<usize>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            max_results_preparation: 3000,
            double_domain_capacity: 20,
            double_domain_capacity_special: 10_000,
            event_ttl_ms: 60_000,
            take_timeout_ms: 100,
            worker_lifetime_ms: 10_000,
            max_workers: 10,
            offline_workers: 3,
            result_lookahead: 10,
            image_lookahead: 50,
            one_result_timeout_ms: 3000,
            strict_normalization: false,
            delete_if_snippet_fail: false,
            result_capacity: None,
        }
    }
}

impl SearchConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: SearchConfig = serde_json::from_str(&text)?;
        Ok(config)
    }

    pub fn event_ttl(&self) -> Duration { Duration::from_millis(self.event_ttl_ms) }
    pub fn take_timeout(&self) -> Duration { Duration::from_millis(self.take_timeout_ms) }
    pub fn worker_lifetime(&self) -> Duration { Duration::from_millis(self.worker_lifetime_ms) }
    pub fn one_result_timeout(&self) -> Duration { Duration::from_millis(self.one_result_timeout_ms) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("search.json");
        std::fs::write(&path, r#"{ "max_workers": 4, "strict_normalization": true }"#).unwrap();
        let c = SearchConfig::from_file(&path).unwrap();
        assert_eq!(c.max_workers, 4);
        assert!(c.strict_normalization);
        assert_eq!(c.max_results_preparation, 3000);
        assert_eq!(c.event_ttl(), Duration::from_secs(60));
    }
}
