//! Page description language detection and page counting for print jobs.
//!
//! [`analyzer::Analyzer`] stages an input, detects its format with
//! [`detect::detect`] and delegates counting to the matching
//! [`parsers::PdlParser`].

pub mod analyzer;
pub mod batch;
pub mod cli;
pub mod config;
pub mod detect;
pub mod error;
pub mod helper;
pub mod jobs;
pub mod parsers;
pub mod report;
pub mod stage;
pub mod util;

pub use analyzer::{Analyzer, AnalyzerOptions, job_size};
pub use error::{AnalysisError, ErrorKind, PdlError};
pub use parsers::Format;
pub use stage::JobSource;
