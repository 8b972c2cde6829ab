//! PCL-XL (PCL 6): tokenizes the binary operator stream and counts
//! `BeginPage` operators.

use super::{Format, PdlParser, SignatureWindows, UEL, split_pjl};
use crate::{config::Config, error::PdlError, error::Result, stage::StagedJob};
use memchr::memmem;
use tracing::debug;

const STREAM_MARKER: &[u8] = b"HP-PCL XL;";
const BEGIN_PAGE: u8 = 0x43;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    BigEndian,
    LittleEndian,
}

impl Binding {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'(' => Some(Binding::BigEndian),
            b')' => Some(Binding::LittleEndian),
            _ => None,
        }
    }
}

pub struct PclXlParser;

/// Finds a stream header (`) HP-PCL XL;...`) and returns the offset of its
/// binding byte.
fn find_stream_header(data: &[u8], from: usize) -> Option<usize> {
    let mut search = from;
    while let Some(rel) = memmem::find(&data[search..], STREAM_MARKER) {
        let at = search + rel;
        if at >= 2 && data[at - 1] == b' ' && matches!(data[at - 2], b'\'' | b'(' | b')') {
            return Some(at - 2);
        }
        search = at + STREAM_MARKER.len();
    }
    None
}

impl PdlParser for PclXlParser {
    fn is_valid(windows: &SignatureWindows) -> bool {
        let pjl = split_pjl(windows.first());
        if let Some(lang) = pjl.language.as_deref() {
            if lang != "PCLXL" {
                return false;
            }
        }
        find_stream_header(pjl.body, 0).is_some()
    }

    fn from_config(_cfg: &Config) -> Self {
        PclXlParser
    }

    fn format(&self) -> Format {
        Format::PclXl
    }

    fn job_size(&self, job: &mut StagedJob) -> Result<u64> {
        let data = job.read_all()?;
        count_begin_pages(&data)
    }
}

/// Counts `BeginPage` operators across every XL stream in `data`.
pub fn count_begin_pages(data: &[u8]) -> Result<u64> {
    let mut pages = 0u64;
    let mut search_from = 0;
    let mut streams = 0;

    while let Some(header) = find_stream_header(data, search_from) {
        let at = header as u64;
        let binding = Binding::from_byte(data[header]).ok_or_else(|| {
            PdlError::malformed(Format::PclXl, at, "ASCII stream binding is not supported")
        })?;
        let body = match memchr::memchr(b'\n', &data[header..]) {
            Some(i) => header + i + 1,
            None => {
                return Err(PdlError::malformed(Format::PclXl, at, "unterminated stream header"));
            }
        };
        streams += 1;
        let (found, end) = Tokenizer::new(data, body, binding).count_pages()?;
        debug!(stream = streams, ?binding, pages = found, "pcl-xl stream");
        pages += found;
        search_from = end;
    }

    if streams == 0 {
        return Err(PdlError::malformed(Format::PclXl, 0, "no PCL-XL stream header"));
    }
    Ok(pages)
}

struct Tokenizer<'a> {
    data: &'a [u8],
    pos: usize,
    binding: Binding,
}

/// Element width of the scalar type encoded in the low bits of a data tag.
fn element_width(index: u8) -> Option<usize> {
    match index {
        0 => Some(1), // ubyte
        1 => Some(2), // uint16
        2 => Some(4), // uint32
        3 => Some(2), // sint16
        4 => Some(4), // sint32
        5 => Some(4), // real32
        _ => None,
    }
}

impl<'a> Tokenizer<'a> {
    fn new(data: &'a [u8], pos: usize, binding: Binding) -> Self {
        Self { data, pos, binding }
    }

    /// Returns the page count and the offset where the stream ended.
    fn count_pages(mut self) -> Result<(u64, usize)> {
        let mut pages = 0;
        while self.pos < self.data.len() {
            let at = self.pos;
            let tag = self.data[at];
            match tag {
                0x00 | 0x09..=0x0d | 0x20 => self.pos += 1,
                0x1b => {
                    if self.data[at..].starts_with(UEL) {
                        return Ok((pages, at + UEL.len()));
                    }
                    return Err(self.malformed(at, "stray escape in operator stream"));
                }
                0x41..=0xbf => {
                    if tag == BEGIN_PAGE {
                        pages += 1;
                    }
                    self.pos += 1;
                }
                0xc0..=0xc5 => {
                    let w = self.width(tag - 0xc0, at)?;
                    self.skip(1 + w, at)?;
                }
                0xc8..=0xcd => {
                    let w = self.width(tag - 0xc8, at)?;
                    self.pos += 1;
                    let len = self.array_length(at)?;
                    self.skip(len.saturating_mul(w), at)?;
                }
                0xd0..=0xd5 => {
                    let w = self.width(tag - 0xd0, at)?;
                    self.skip(1 + 2 * w, at)?;
                }
                0xe0..=0xe5 => {
                    let w = self.width(tag - 0xe0, at)?;
                    self.skip(1 + 4 * w, at)?;
                }
                0xf8 => self.skip(2, at)?,
                0xf9 => self.skip(3, at)?,
                0xfa => {
                    self.pos += 1;
                    let len = self.read_uint(4, at)?;
                    self.skip(len, at)?;
                }
                0xfb => {
                    self.pos += 1;
                    let len = self.read_uint(1, at)?;
                    self.skip(len, at)?;
                }
                _ => return Err(self.malformed(at, format!("unknown tag 0x{tag:02x}"))),
            }
        }
        Ok((pages, self.pos))
    }

    fn width(&self, index: u8, at: usize) -> Result<usize> {
        element_width(index).ok_or_else(|| self.malformed(at, "bad data type"))
    }

    /// Array lengths are a ubyte or uint16 value with its own tag.
    fn array_length(&mut self, at: usize) -> Result<usize> {
        let Some(&len_tag) = self.data.get(self.pos) else {
            return Err(self.malformed(at, "truncated array length"));
        };
        self.pos += 1;
        match len_tag {
            0xc0 => self.read_uint(1, at),
            0xc1 => self.read_uint(2, at),
            other => Err(self.malformed(at, format!("bad array length tag 0x{other:02x}"))),
        }
    }

    fn read_uint(&mut self, width: usize, at: usize) -> Result<usize> {
        let end = self.pos + width;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| self.malformed(at, "truncated value"))?;
        let value = match self.binding {
            Binding::BigEndian => bytes.iter().fold(0usize, push_byte),
            Binding::LittleEndian => bytes.iter().rev().fold(0usize, push_byte),
        };
        self.pos = end;
        Ok(value)
    }

    fn skip(&mut self, n: usize, at: usize) -> Result<()> {
        let end = self.pos.saturating_add(n);
        if end > self.data.len() {
            return Err(self.malformed(at, format!("token needs {n} bytes past end of data")));
        }
        self.pos = end;
        Ok(())
    }

    fn malformed(&self, at: usize, reason: impl Into<String>) -> PdlError {
        PdlError::malformed(Format::PclXl, at as u64, reason)
    }
}

fn push_byte(acc: usize, b: &u8) -> usize {
    (acc << 8) | usize::from(*b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(body: &[u8]) -> Vec<u8> {
        let mut v = b") HP-PCL XL;2;0;Comment\r\n".to_vec();
        v.extend_from_slice(body);
        v
    }

    #[test]
    fn attributes_hiding_begin_page_byte_are_skipped() {
        // uint16 value 0x4343 then attribute id 0x43, neither is an operator.
        let data = stream(&[0xc1, 0x43, 0x43, 0xf8, 0x43, BEGIN_PAGE, 0x44]);
        assert_eq!(count_begin_pages(&data).unwrap(), 1);
    }

    #[test]
    fn embedded_data_respects_binding() {
        let mut body = vec![0xfa, 0x03, 0x00, 0x00, 0x00, 0x43, 0x43, 0x43];
        body.push(BEGIN_PAGE);
        assert_eq!(count_begin_pages(&stream(&body)).unwrap(), 1);

        let mut be = b"( HP-PCL XL;2;0\n".to_vec();
        be.extend_from_slice(&[0xfa, 0x00, 0x00, 0x00, 0x02, 0x43, 0x43, BEGIN_PAGE]);
        assert_eq!(count_begin_pages(&be).unwrap(), 1);
    }

    #[test]
    fn arrays_are_skipped() {
        let data = stream(&[0xc8, 0xc0, 0x02, 0x43, 0x43, BEGIN_PAGE]);
        assert_eq!(count_begin_pages(&data).unwrap(), 1);
    }

    #[test]
    fn ascii_binding_is_malformed() {
        let mut data = b"\x1b%-12345X@PJL ENTER LANGUAGE=PCLXL\r\n".to_vec();
        let header = data.len();
        data.extend_from_slice(b"' HP-PCL XL;2;0\r\nBeginPage\r\n");
        match count_begin_pages(&data).unwrap_err() {
            PdlError::MalformedDocument { offset, .. } => assert_eq!(offset, header as u64),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn truncated_token_reports_offset() {
        let data = stream(&[BEGIN_PAGE, 0xfa, 0x10, 0x00]);
        let err = count_begin_pages(&data).unwrap_err();
        match err {
            PdlError::MalformedDocument { offset, .. } => assert_eq!(offset, 26),
            other => panic!("unexpected {other:?}"),
        }
    }
}
