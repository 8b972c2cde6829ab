//! PostScript: trusts `%%Page:` document-structuring comments when they are
//! present and agree with `%%Pages:`, otherwise asks an external renderer.

use super::{Format, PdlParser, SignatureWindows, split_pjl};
use crate::{
    config::{Config, HelperCommand},
    error::{IoContext, Result},
    helper,
    stage::StagedJob,
};
use std::io::{BufRead, Read, Seek, SeekFrom};
use tracing::{debug, warn};

/// DOS EPS binary header magic.
const EPS_BINARY_MAGIC: [u8; 4] = [0xC5, 0xD0, 0xD3, 0xC6];

pub struct PostScriptParser {
    helper: HelperCommand,
    timeout_seconds: u64,
}

/// What the structuring comments say about a job.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DscSummary {
    pub page_markers: u64,
    /// Last numeric `%%Pages:` value outside embedded documents.
    pub declared_pages: Option<u64>,
}

impl DscSummary {
    pub fn is_consistent(&self) -> bool {
        self.page_markers > 0 && self.declared_pages.is_none_or(|d| d == self.page_markers)
    }
}

impl PdlParser for PostScriptParser {
    fn is_valid(windows: &SignatureWindows) -> bool {
        let pjl = split_pjl(windows.first());
        if let Some(lang) = pjl.language.as_deref() {
            return lang == "POSTSCRIPT";
        }
        let body = pjl.body;
        body.starts_with(b"%!") || body.starts_with(&EPS_BINARY_MAGIC)
    }

    fn from_config(cfg: &Config) -> Self {
        Self {
            helper: cfg.helpers.postscript.clone(),
            timeout_seconds: cfg.helpers.timeout_seconds,
        }
    }

    fn format(&self) -> Format {
        Format::PostScript
    }

    fn required_helpers(&self) -> Vec<String> {
        vec![self.helper.program.clone()]
    }

    fn job_size(&self, job: &mut StagedJob) -> Result<u64> {
        let summary = self.scan_dsc(job)?;
        debug!(?summary, "postscript structuring comments");
        if summary.is_consistent() {
            return Ok(summary.page_markers);
        }

        if summary.page_markers > 0 {
            warn!(
                "{}: %%Page: count {} disagrees with %%Pages: {:?}, using {}",
                job.name(),
                summary.page_markers,
                summary.declared_pages,
                self.helper.program
            );
        }
        let path = job.materialize()?;
        let output = helper::run_helper(&self.helper, &path, self.timeout_seconds)?;
        helper::page_count(self.helper.output, &output, Format::PostScript)
    }
}

impl PostScriptParser {
    fn scan_dsc(&self, job: &mut StagedJob) -> Result<DscSummary> {
        let name = job.name().to_string();
        let mut reader = job.reader()?;

        let mut head = [0u8; 12];
        let n = read_up_to(&mut reader, &mut head).io_context(format_args!("read {name}"))?;
        if n == head.len() && head[..4] == EPS_BINARY_MAGIC {
            let offset = u32::from_le_bytes([head[4], head[5], head[6], head[7]]) as u64;
            let length = u32::from_le_bytes([head[8], head[9], head[10], head[11]]) as u64;
            debug!(offset, length, "EPS binary header");
            reader
                .seek(SeekFrom::Start(offset))
                .io_context(format_args!("seek {name}"))?;
            return scan_lines(reader.take(length)).io_context(format_args!("read {name}"));
        }

        reader
            .seek(SeekFrom::Start(0))
            .io_context(format_args!("rewind {name}"))?;
        scan_lines(reader).io_context(format_args!("read {name}"))
    }
}

fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Walks the job line by line (LF, CR or CRLF) collecting DSC page data.
pub fn scan_lines(mut reader: impl BufRead) -> std::io::Result<DscSummary> {
    let mut summary = DscSummary::default();
    let mut depth = 0u32;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        for line in buf.split(|&b| b == b'\r' || b == b'\n') {
            scan_line(line, &mut depth, &mut summary);
        }
    }
    Ok(summary)
}

fn scan_line(line: &[u8], depth: &mut u32, summary: &mut DscSummary) {
    if !line.starts_with(b"%%") {
        return;
    }
    if line.starts_with(b"%%BeginDocument") {
        *depth += 1;
    } else if line.starts_with(b"%%EndDocument") {
        *depth = depth.saturating_sub(1);
    } else if *depth == 0 && line.starts_with(b"%%Page:") {
        summary.page_markers += 1;
    } else if let Some(rest) = line.strip_prefix(b"%%Pages:").filter(|_| *depth == 0) {
        let value = String::from_utf8_lossy(rest);
        if let Some(n) = value
            .split_whitespace()
            .next()
            .and_then(|tok| tok.parse::<u64>().ok())
        {
            summary.declared_pages = Some(n);
        }
    }
}
