pub mod pcl;
pub mod pclxl;
pub mod pdf;
pub mod plain;
pub mod postscript;

use crate::{config::Config, error::Result, stage::StagedJob};
use memchr::memmem;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use pcl::PclParser;
pub use pclxl::PclXlParser;
pub use pdf::PdfParser;
pub use plain::PlainTextParser;
pub use postscript::PostScriptParser;

/// Page description languages this crate can recognise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Format {
    PostScript,
    PclXl,
    Pdf,
    Pcl,
    PlainText,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Format::PostScript => "PostScript",
            Format::PclXl => "PCL-XL",
            Format::Pdf => "PDF",
            Format::Pcl => "PCL",
            Format::PlainText => "plain text",
        };
        f.write_str(s)
    }
}

/// Head and tail bytes of a job, captured once and shared by every
/// candidate parser during detection.
#[derive(Debug, Clone, Default)]
pub struct SignatureWindows {
    first: Vec<u8>,
    last: Vec<u8>,
}

impl SignatureWindows {
    pub fn new(first: Vec<u8>, last: Vec<u8>) -> Self {
        Self { first, last }
    }

    pub fn first(&self) -> &[u8] {
        &self.first
    }

    /// May be empty when the job is shorter than the tail window.
    pub fn last(&self) -> &[u8] {
        &self.last
    }
}

/// One page description language.
///
/// `is_valid` only looks at the signature windows; `job_size` may read
/// the whole staged job.
pub trait PdlParser {
    fn is_valid(windows: &SignatureWindows) -> bool
    where
        Self: Sized;

    fn from_config(cfg: &Config) -> Self
    where
        Self: Sized;

    fn format(&self) -> Format;

    /// External programs this parser may need to count pages.
    fn required_helpers(&self) -> Vec<String> {
        Vec::new()
    }

    fn job_size(&self, job: &mut StagedJob) -> Result<u64>;
}

/// Universal Exit Language, which opens a PJL header.
pub(crate) const UEL: &[u8] = b"\x1b%-12345X";

/// A job's PJL wrapper, if any, and the bytes that follow it.
#[derive(Debug)]
pub(crate) struct PjlHeader<'a> {
    /// Upper-cased value of `@PJL ENTER LANGUAGE=...`.
    pub language: Option<String>,
    pub has_pjl: bool,
    pub body: &'a [u8],
}

/// Splits an optional `UEL @PJL ...` header off the head of a job.
pub(crate) fn split_pjl(head: &[u8]) -> PjlHeader<'_> {
    let head = skip_ctrl_d(head);
    let Some(rest) = head.strip_prefix(UEL) else {
        return PjlHeader {
            language: None,
            has_pjl: false,
            body: head,
        };
    };

    let mut pos = 0;
    let mut language = None;
    loop {
        while pos < rest.len() && matches!(rest[pos], b'\r' | b'\n' | b' ' | b'\t') {
            pos += 1;
        }
        let line_start = pos;
        if !starts_with_ignore_case(&rest[line_start..], b"@PJL") {
            break;
        }
        let line_end = memchr::memchr(b'\n', &rest[line_start..])
            .map(|i| line_start + i + 1)
            .unwrap_or(rest.len());
        let line = String::from_utf8_lossy(&rest[line_start..line_end]).to_ascii_uppercase();
        pos = line_end;
        if let Some(lang) = parse_enter_language(&line) {
            language = Some(lang);
            break;
        }
    }

    PjlHeader {
        language,
        has_pjl: true,
        body: &rest[pos..],
    }
}

fn parse_enter_language(line: &str) -> Option<String> {
    let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
    let idx = compact.find("ENTERLANGUAGE=")?;
    let lang = &compact[idx + "ENTERLANGUAGE=".len()..];
    if lang.is_empty() {
        None
    } else {
        Some(lang.to_string())
    }
}

/// PostScript jobs from some drivers start with a Ctrl-D.
pub(crate) fn skip_ctrl_d(data: &[u8]) -> &[u8] {
    let mut data = data;
    while let Some(rest) = data.strip_prefix(b"\x04") {
        data = rest;
    }
    data
}

pub(crate) fn starts_with_ignore_case(data: &[u8], prefix: &[u8]) -> bool {
    data.len() >= prefix.len() && data[..prefix.len()].eq_ignore_ascii_case(prefix)
}

pub(crate) fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    memmem::find(haystack, needle).is_some()
}
