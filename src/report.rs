use crate::parsers::Format;
use serde::{Deserialize, Serialize};

/// One successfully counted input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCount {
    pub input: String,
    pub format: Format,
    pub pages: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectReport {
    pub input: String,
    pub format: Option<Format>,
    pub candidates: Vec<Format>,
    pub file_bytes: u64,
    pub first_block_bytes: usize,
    pub last_block_bytes: usize,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelperReport {
    pub format: Format,
    pub program: String,
    pub resolved: Option<String>,
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLookup {
    pub job_id: String,
    pub pages: u64,
    pub cached: bool,
}
