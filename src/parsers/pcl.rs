//! PCL 3/4/5: scans escape sequences and control codes, counting page
//! ejects. Content left on the page after the last eject adds one page.

use super::{Format, PdlParser, SignatureWindows, split_pjl, starts_with_ignore_case};
use crate::{config::Config, error::PdlError, error::Result, stage::StagedJob};
use tracing::debug;

const ESC: u8 = 0x1b;
const FORM_FEED: u8 = 0x0c;

pub struct PclParser;

impl PdlParser for PclParser {
    fn is_valid(windows: &SignatureWindows) -> bool {
        let pjl = split_pjl(windows.first());
        if let Some(lang) = pjl.language.as_deref() {
            return lang.starts_with("PCL") && lang != "PCLXL";
        }
        let body = pjl.body;
        body.first() == Some(&ESC)
            && matches!(body.get(1), Some(b'E' | b'*' | b'&' | b'(' | b')' | b'%'))
    }

    fn from_config(_cfg: &Config) -> Self {
        PclParser
    }

    fn format(&self) -> Format {
        Format::Pcl
    }

    fn job_size(&self, job: &mut StagedJob) -> Result<u64> {
        let data = job.read_all()?;
        let pages = count_pages(&data)?;
        debug!(pages, "pcl scan");
        Ok(pages)
    }
}

/// One parsed `ESC p g value term` command. Combined sequences such as
/// `ESC&l1o2A` produce several commands sharing `param` and `group`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Command {
    param: u8,
    group: Option<u8>,
    value: f64,
    /// Upper-cased terminator.
    term: u8,
}

#[derive(Debug, Default)]
struct PageState {
    pages: u64,
    marked: bool,
}

impl PageState {
    fn mark(&mut self) {
        self.marked = true;
    }

    /// Explicit eject: always emits a page.
    fn eject(&mut self) {
        self.pages += 1;
        self.marked = false;
    }

    /// Reset or implicit eject: emits a page only if something was drawn.
    fn flush(&mut self) {
        if self.marked {
            self.eject();
        }
    }
}

/// Counts pages in a PCL byte stream.
pub fn count_pages(data: &[u8]) -> Result<u64> {
    let mut state = PageState::default();
    let mut i = 0;

    while i < data.len() {
        match data[i] {
            ESC => i = escape(data, i, &mut state)?,
            FORM_FEED => {
                state.eject();
                i += 1;
            }
            b'\r' | b'\n' | 0x08 | b'\t' | 0x0e | 0x0f | 0x00 => i += 1,
            b if b >= 0x20 && b != 0x7f => {
                state.mark();
                i += 1;
            }
            _ => i += 1,
        }
    }
    state.flush();
    Ok(state.pages)
}

/// Handles the escape at `start`, returning the offset just past it (and
/// past any payload it carries).
fn escape(data: &[u8], start: usize, state: &mut PageState) -> Result<usize> {
    let Some(&next) = data.get(start + 1) else {
        return Ok(data.len());
    };
    if next == b'E' {
        state.flush();
        return Ok(start + 2);
    }
    if !(0x21..=0x2f).contains(&next) {
        // Two-character escape such as ESC 9 or ESC =.
        return Ok(start + 2);
    }

    let (commands, mut end) = parse_parameterized(data, start);
    for cmd in commands {
        match (cmd.param, cmd.group, cmd.term) {
            (b'%', None, b'X') => {
                // Universal Exit Language: skip the PJL that follows.
                state.flush();
                end = skip_pjl(data, end);
            }
            (b'%', None, b'B') => {
                end = skip_hpgl(data, end, state);
            }
            (b'&', Some(b'l'), b'H') if cmd.value == 0.0 => state.eject(),
            (b'&', Some(b'p'), b'X') => {
                end = payload(data, start, end, cmd.value)?;
                state.mark();
            }
            // Row data (`W`) and per-plane data (`V`) both carry a payload.
            (b'*', Some(b'b'), b'W' | b'V') => {
                end = payload(data, start, end, cmd.value)?;
                if cmd.value > 0.0 {
                    state.mark();
                }
            }
            (b'*', Some(b'c'), b'P') => state.mark(),
            (_, _, b'W') => end = payload(data, start, end, cmd.value)?,
            _ => {}
        }
    }
    Ok(end)
}

fn payload(data: &[u8], start: usize, end: usize, value: f64) -> Result<usize> {
    let len = if value > 0.0 { value as usize } else { 0 };
    let stop = end.saturating_add(len);
    if stop > data.len() {
        return Err(PdlError::malformed(
            Format::Pcl,
            start as u64,
            format!("escape announces {len} data bytes, {} remain", data.len() - end),
        ));
    }
    Ok(stop)
}

/// Parses `ESC param [group] (value term)+` starting at the escape byte.
fn parse_parameterized(data: &[u8], start: usize) -> (Vec<Command>, usize) {
    let param = data[start + 1];
    let mut i = start + 2;
    let group = match data.get(i) {
        Some(&g @ 0x60..=0x7e) => {
            i += 1;
            Some(g)
        }
        _ => None,
    };

    let mut commands = Vec::new();
    loop {
        let value_start = i;
        while i < data.len() && matches!(data[i], b'0'..=b'9' | b'+' | b'-' | b'.') {
            i += 1;
        }
        let value = std::str::from_utf8(&data[value_start..i])
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);
        match data.get(i) {
            Some(&t @ 0x60..=0x7e) => {
                commands.push(Command {
                    param,
                    group,
                    value,
                    term: t.to_ascii_uppercase(),
                });
                i += 1;
            }
            Some(&t @ 0x40..=0x5e) => {
                commands.push(Command {
                    param,
                    group,
                    value,
                    term: t,
                });
                return (commands, i + 1);
            }
            _ => return (commands, i),
        }
    }
}

/// Skips `@PJL` lines (and blank lines between them).
fn skip_pjl(data: &[u8], mut i: usize) -> usize {
    loop {
        while i < data.len() && matches!(data[i], b'\r' | b'\n' | b' ' | b'\t') {
            i += 1;
        }
        if !starts_with_ignore_case(&data[i..], b"@PJL") {
            return i;
        }
        i = match memchr::memchr(b'\n', &data[i..]) {
            Some(n) => i + n + 1,
            None => data.len(),
        };
    }
}

/// Skips an HP-GL/2 block up to `ESC%#A`, `ESC E` or UEL. Any drawing
/// instruction marks the page.
fn skip_hpgl(data: &[u8], start: usize, state: &mut PageState) -> usize {
    let mut i = start;
    let mut end = data.len();
    while let Some(n) = memchr::memchr(ESC, &data[i..]) {
        let at = i + n;
        let next = data.get(at + 1);
        if next == Some(&b'E') {
            end = at;
            break;
        }
        if next == Some(&b'%') {
            let (commands, _) = parse_parameterized(data, at);
            if commands.iter().any(|c| matches!(c.term, b'A' | b'X')) {
                end = at;
                break;
            }
        }
        i = at + 1;
    }
    if data[start..end].iter().any(|b| b.is_ascii_alphabetic()) {
        state.mark();
    }
    end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_sequence_is_split() {
        let (cmds, end) = parse_parameterized(b"\x1b&l1o2A rest", 0);
        assert_eq!(end, 7);
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].term, b'O');
        assert_eq!(cmds[1].term, b'A');
        assert_eq!(cmds[1].value, 2.0);
    }

    #[test]
    fn font_selection_without_group() {
        let (cmds, end) = parse_parameterized(b"\x1b(8U", 0);
        assert_eq!(end, 4);
        assert_eq!(cmds[0].group, None);
        assert_eq!(cmds[0].term, b'U');
    }

    #[test]
    fn raster_payload_is_skipped() {
        // Payload contains a form feed that must not count.
        let data = b"\x1bE\x1b*r1A\x1b*b3W\x0c\x0c\x0c\x1b*rB\x0c\x1bE";
        assert_eq!(count_pages(data).unwrap(), 1);
    }

    #[test]
    fn reset_after_text_emits_page() {
        assert_eq!(count_pages(b"\x1bEHello\x1bE").unwrap(), 1);
        assert_eq!(count_pages(b"\x1bE\x1bE").unwrap(), 0);
    }

    #[test]
    fn plane_payload_is_skipped() {
        let mut page = b"\x1b*r3U\x1b*r1A".to_vec();
        for _ in 0..4 {
            page.extend_from_slice(b"\x1b*b2V\x0c\x0c\x1b*b2V\x1b\x0c\x1b*b2W\x0c\x0c");
        }
        page.extend_from_slice(b"\x1b*rC\x0c");
        let mut data = b"\x1bE".to_vec();
        data.extend_from_slice(&page);
        data.extend_from_slice(&page);
        data.extend_from_slice(b"\x1bE");
        assert_eq!(count_pages(&data).unwrap(), 2);
    }

    #[test]
    fn hpgl_block_is_skipped_and_marks_page() {
        let data = b"\x1bE\x1b%0BIN;SP1;PA0,0;\x0cPD100,100;\x1b%0A\x0c\x1bE";
        assert_eq!(count_pages(data).unwrap(), 1);

        let drawn_only = b"\x1bE\x1b%1BIN;PD10,10;\x1b%1A\x1bE";
        assert_eq!(count_pages(drawn_only).unwrap(), 1);
    }

    #[test]
    fn page_eject_command_always_ejects() {
        assert_eq!(count_pages(b"\x1bEText\x1b&l0H\x1bE").unwrap(), 1);
        assert_eq!(count_pages(b"\x1bE\x1b&l0H\x1b&l0HText\x1bE").unwrap(), 3);
        // Paper source selection, not an eject.
        assert_eq!(count_pages(b"\x1bE\x1b&l1HText\x1bE").unwrap(), 1);
    }

    #[test]
    fn truncated_payload_is_malformed() {
        let err = count_pages(b"\x1bEtext\x1b*b100Wabc").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MalformedDocument);
    }
}
