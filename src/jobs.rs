//! Page counts keyed by print-queue job id. A job is analyzed at most once;
//! later lookups are served from the store.

use crate::{
    analyzer::{self, AnalyzerOptions},
    config::Config,
    error::{AnalysisError, IoContext, PdlError},
    report::JobLookup,
    stage::JobSource,
    util::now_rfc3339,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub trait PageCountStore {
    fn get(&self, job_id: &str) -> Option<u64>;
    fn put(&mut self, job_id: &str, pages: u64) -> Result<(), PdlError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    counts: HashMap<String, u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PageCountStore for MemoryStore {
    fn get(&self, job_id: &str) -> Option<u64> {
        self.counts.get(job_id).copied()
    }

    fn put(&mut self, job_id: &str, pages: u64) -> Result<(), PdlError> {
        self.counts.insert(job_id.to_string(), pages);
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCount {
    pub pages: u64,
    pub counted_at: String,
}

/// JSON file of `job id -> count`, rewritten atomically on every `put`.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: BTreeMap<String, StoredCount>,
}

impl JsonFileStore {
    /// Opens `path`, starting empty when it doesn't exist yet.
    pub fn open(path: &Path) -> Result<Self, PdlError> {
        let entries = if path.exists() {
            let raw = std::fs::read(path).io_context(format_args!("read {}", path.display()))?;
            serde_json::from_slice(&raw).map_err(|e| {
                PdlError::io(
                    format!("parse {}", path.display()),
                    std::io::Error::new(std::io::ErrorKind::InvalidData, e),
                )
            })?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn entry(&self, job_id: &str) -> Option<&StoredCount> {
        self.entries.get(job_id)
    }

    fn save(&self) -> Result<(), PdlError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let raw = serde_json::to_vec_pretty(&self.entries)
            .map_err(|e| PdlError::io("serialize job store", std::io::Error::other(e)))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .io_context(format_args!("create temp file in {}", dir.display()))?;
        tmp.write_all(&raw)
            .io_context(format_args!("write {}", tmp.path().display()))?;
        tmp.persist(&self.path)
            .map_err(|e| PdlError::io(format!("replace {}", self.path.display()), e.error))?;
        Ok(())
    }
}

impl PageCountStore for JsonFileStore {
    fn get(&self, job_id: &str) -> Option<u64> {
        self.entries.get(job_id).map(|e| e.pages)
    }

    fn put(&mut self, job_id: &str, pages: u64) -> Result<(), PdlError> {
        self.entries.insert(
            job_id.to_string(),
            StoredCount {
                pages,
                counted_at: now_rfc3339(),
            },
        );
        self.save()
    }
}

/// Page count for a queued job. A stored count wins; otherwise the
/// document is analyzed and the result stored. With no document to read
/// the count is 0 and nothing is stored.
pub fn page_count_for_job(
    store: &mut dyn PageCountStore,
    job_id: &str,
    document: Option<JobSource>,
    options: &AnalyzerOptions,
    cfg: &Config,
) -> Result<JobLookup, AnalysisError> {
    if let Some(pages) = store.get(job_id) {
        debug!(job_id, pages, "stored count");
        return Ok(JobLookup {
            job_id: job_id.to_string(),
            pages,
            cached: true,
        });
    }

    let Some(document) = document else {
        debug!(job_id, "no document available");
        return Ok(JobLookup {
            job_id: job_id.to_string(),
            pages: 0,
            cached: false,
        });
    };

    let input = document.name();
    let pages = analyzer::job_size(document, options.clone(), cfg)?;
    store
        .put(job_id, pages)
        .map_err(|e| AnalysisError::new(input, e))?;
    info!(job_id, pages, "counted and stored");
    Ok(JobLookup {
        job_id: job_id.to_string(),
        pages,
        cached: false,
    })
}
