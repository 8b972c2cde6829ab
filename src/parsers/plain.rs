//! Plain text, the catch-all. Pages break on form feeds and every
//! `lines_per_page` lines.

use super::{Format, PdlParser, SignatureWindows};
use crate::{config::Config, error::IoContext, error::Result, stage::StagedJob};
use std::io::BufRead;

const FORM_FEED: u8 = 0x0c;
/// Share of unexpected control bytes tolerated in the head.
const MAX_CONTROL_RATIO: f64 = 0.05;

pub struct PlainTextParser {
    lines_per_page: u64,
}

impl PdlParser for PlainTextParser {
    fn is_valid(windows: &SignatureWindows) -> bool {
        let head = windows.first();
        if head.is_empty() || head.contains(&0) {
            return false;
        }
        let controls = head
            .iter()
            .filter(|&&b| b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r' | FORM_FEED | 0x1b | 0x08))
            .count();
        (controls as f64) / (head.len() as f64) <= MAX_CONTROL_RATIO
    }

    fn from_config(cfg: &Config) -> Self {
        Self {
            lines_per_page: u64::from(cfg.plain.lines_per_page.max(1)),
        }
    }

    fn format(&self) -> Format {
        Format::PlainText
    }

    fn job_size(&self, job: &mut StagedJob) -> Result<u64> {
        let name = job.name().to_string();
        let mut counter = TextPageCounter::new(self.lines_per_page);
        let mut reader = job.reader()?;
        loop {
            let buf = reader.fill_buf().io_context(format_args!("read {name}"))?;
            if buf.is_empty() {
                break;
            }
            counter.feed(buf);
            let n = buf.len();
            reader.consume(n);
        }
        Ok(counter.finish())
    }
}

/// Incremental line / form-feed page simulation.
#[derive(Debug)]
pub struct TextPageCounter {
    lines_per_page: u64,
    pages: u64,
    lines_on_page: u64,
    /// Printable bytes seen since the last line break.
    partial_line: bool,
    /// The current page was started by overflowing the previous one, so a
    /// form feed right away must not emit a blank page.
    after_overflow: bool,
    total_lines: u64,
    any_content: bool,
}

impl TextPageCounter {
    pub fn new(lines_per_page: u64) -> Self {
        Self {
            lines_per_page: lines_per_page.max(1),
            pages: 0,
            lines_on_page: 0,
            partial_line: false,
            after_overflow: false,
            total_lines: 0,
            any_content: false,
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        for &b in data {
            match b {
                b'\n' => {
                    self.total_lines += 1;
                    self.lines_on_page += 1;
                    self.partial_line = false;
                    self.after_overflow = false;
                    if self.lines_on_page >= self.lines_per_page {
                        self.pages += 1;
                        self.lines_on_page = 0;
                        self.after_overflow = true;
                    }
                }
                FORM_FEED => {
                    if self.partial_line {
                        self.total_lines += 1;
                    }
                    if self.page_pending() || !self.after_overflow {
                        self.pages += 1;
                    }
                    self.lines_on_page = 0;
                    self.partial_line = false;
                    self.after_overflow = false;
                }
                b' ' | b'\t' | b'\r' | 0x0b => {}
                _ => {
                    self.partial_line = true;
                    self.any_content = true;
                    self.after_overflow = false;
                }
            }
        }
    }

    fn page_pending(&self) -> bool {
        self.lines_on_page > 0 || self.partial_line
    }

    pub fn finish(mut self) -> u64 {
        if !self.any_content {
            return 0;
        }
        if self.partial_line {
            self.total_lines += 1;
        }
        if self.page_pending() {
            self.pages += 1;
        }
        let by_lines = self.total_lines.div_ceil(self.lines_per_page);
        self.pages.max(by_lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(data: &[u8], lpp: u64) -> u64 {
        let mut c = TextPageCounter::new(lpp);
        c.feed(data);
        c.finish()
    }

    #[test]
    fn lines_overflow_pages() {
        assert_eq!(count(b"a\nb\nc\nd\ne\n", 2), 3);
        assert_eq!(count(b"a\nb\nc\nd\n", 2), 2);
    }

    #[test]
    fn form_feed_after_full_page_is_not_blank_page() {
        assert_eq!(count(b"a\nb\n\x0cc\n", 2), 2);
    }

    #[test]
    fn blank_content_is_zero_pages() {
        assert_eq!(count(b"\n\n  \r\n", 66), 0);
        assert_eq!(count(b"\x0c\x0c", 66), 0);
    }

    #[test]
    fn unterminated_last_line_counts() {
        assert_eq!(count(b"one\ntwo", 66), 1);
    }
}
