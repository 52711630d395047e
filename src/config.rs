use std::time::Duration;

/// Where operator archives live and how patiently to fetch them.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The archive for an operator is expected at
    /// `{base_url}/{operator}/{operator}.zip`.
    pub base_url: String,
    /// Per-request timeout for archive fetches. An unbounded hang here
    /// would wedge every caller awaiting the same in-flight load.
    pub fetch_timeout: Duration,
    /// Number of resolved polylines kept in the shape cache.
    pub shape_cache_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            base_url: "https://opendata.samtrafiken.se/gtfs".to_string(),
            fetch_timeout: Duration::from_secs(30),
            shape_cache_size: 512,
        }
    }
}
