#[derive(Debug, Clone)]
pub struct Config {
    pub sqlite_path: String,
    pub scenario: String,
    pub progress_poll_ms: u64,
    pub check_invariants: bool,
    pub list_limit: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            sqlite_path: std::env::var("SQLITE_PATH").unwrap_or_else(|_| "./user_data/database.sqlite".to_string()),
            scenario: std::env::var("SCENARIO").unwrap_or_else(|_| "first_block".to_string()),
            progress_poll_ms: std::env::var("PROGRESS_POLL_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(100),
            check_invariants: std::env::var("CHECK_INVARIANTS").map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes")).unwrap_or(true),
            list_limit: std::env::var("LIST_LIMIT").ok().and_then(|v| v.parse().ok()).unwrap_or(10),
        }
    }
}
