//! Input staging: turns a path, stdin or an arbitrary reader into a
//! seekable job whose size is known, spilling non-seekable streams to a
//! uniquely named temporary file that disappears with the [`StagedJob`].

use crate::{
    config::Staging,
    error::{IoContext, PdlError, Result},
    parsers::SignatureWindows,
};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

pub const KILOBYTE: usize = 1024;
pub const MEGABYTE: usize = 1024 * KILOBYTE;
pub const FIRST_BLOCK_SIZE: usize = 16 * KILOBYTE;
pub const LAST_BLOCK_SIZE: usize = KILOBYTE / 4;

/// Name used for standard input in diagnostics and on the command line.
pub const STDIN_NAME: &str = "-";

pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// Where a print job's bytes come from.
pub enum JobSource {
    Path(PathBuf),
    Stdin,
    /// A plain stream; it gets spilled to a temporary file.
    Reader {
        name: String,
        reader: Box<dyn Read>,
    },
    /// A handle that can already seek; used in place.
    Seekable {
        name: String,
        handle: Box<dyn ReadSeek>,
    },
}

impl JobSource {
    /// Maps a command-line argument to a source, `-` meaning stdin.
    pub fn from_arg(arg: &str) -> Self {
        if arg == STDIN_NAME {
            JobSource::Stdin
        } else {
            JobSource::Path(PathBuf::from(arg))
        }
    }

    pub fn reader(name: impl Into<String>, reader: impl Read + 'static) -> Self {
        JobSource::Reader {
            name: name.into(),
            reader: Box::new(reader),
        }
    }

    pub fn seekable(name: impl Into<String>, handle: impl Read + Seek + 'static) -> Self {
        JobSource::Seekable {
            name: name.into(),
            handle: Box::new(handle),
        }
    }

    pub fn name(&self) -> String {
        match self {
            JobSource::Path(p) => p.display().to_string(),
            JobSource::Stdin => STDIN_NAME.to_string(),
            JobSource::Reader { name, .. } | JobSource::Seekable { name, .. } => name.clone(),
        }
    }
}

impl std::fmt::Debug for JobSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobSource::Path(p) => f.debug_tuple("Path").field(p).finish(),
            JobSource::Stdin => f.write_str("Stdin"),
            JobSource::Reader { name, .. } => f.debug_struct("Reader").field("name", name).finish(),
            JobSource::Seekable { name, .. } => {
                f.debug_struct("Seekable").field("name", name).finish()
            }
        }
    }
}

/// A job ready for detection and counting.
pub struct StagedJob {
    name: String,
    handle: Box<dyn ReadSeek>,
    size: u64,
    /// Original filesystem path, when the job was opened in place.
    origin: Option<PathBuf>,
    spill: Option<NamedTempFile>,
    staging: Staging,
}

impl std::fmt::Debug for StagedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedJob")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("origin", &self.origin)
            .field("spill", &self.spill.as_ref().map(|s| s.path().to_path_buf()))
            .finish()
    }
}

/// Stages `source` so that it can be read at random. Zero-byte inputs are
/// rejected here, before any detection work.
pub fn stage(source: JobSource, staging: &Staging) -> Result<StagedJob> {
    let name = source.name();
    let mut job = match source {
        JobSource::Path(path) => {
            let file = File::open(&path).io_context(format_args!("open {}", path.display()))?;
            let size = file
                .metadata()
                .io_context(format_args!("stat {}", path.display()))?
                .len();
            StagedJob {
                name,
                handle: Box::new(file),
                size,
                origin: Some(path),
                spill: None,
                staging: staging.clone(),
            }
        }
        JobSource::Stdin => {
            let stdin = std::io::stdin();
            let mut lock = stdin.lock();
            spill(name, &mut lock, staging)?
        }
        JobSource::Reader { name, mut reader } => spill(name, &mut reader, staging)?,
        JobSource::Seekable { name, mut handle } => {
            let size = handle
                .seek(SeekFrom::End(0))
                .io_context(format_args!("seek {name}"))?;
            handle
                .seek(SeekFrom::Start(0))
                .io_context(format_args!("rewind {name}"))?;
            StagedJob {
                name,
                handle,
                size,
                origin: None,
                spill: None,
                staging: staging.clone(),
            }
        }
    };

    if job.size == 0 {
        return Err(PdlError::EmptyInput { input: job.name });
    }
    job.rewind()?;
    debug!(input = %job.name, size = job.size, spilled = job.spill.is_some(), "staged");
    Ok(job)
}

fn spill(name: String, reader: &mut dyn Read, staging: &Staging) -> Result<StagedJob> {
    let mut tmp = new_spill_file(staging)?;
    let size = copy_chunked(reader, tmp.as_file_mut(), staging.chunk_bytes)
        .io_context(format_args!("spill {name} to {}", tmp.path().display()))?;
    tmp.as_file_mut()
        .flush()
        .io_context(format_args!("flush {}", tmp.path().display()))?;
    let handle = tmp
        .reopen()
        .io_context(format_args!("reopen {}", tmp.path().display()))?;
    Ok(StagedJob {
        name,
        handle: Box::new(handle),
        size,
        origin: None,
        spill: Some(tmp),
        staging: staging.clone(),
    })
}

fn new_spill_file(staging: &Staging) -> Result<NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    builder
        .prefix(&staging.spill_prefix)
        .suffix(&staging.spill_suffix);
    let tmp = if staging.spill_dir.is_empty() {
        builder.tempfile()
    } else {
        builder.tempfile_in(&staging.spill_dir)
    };
    tmp.io_context("create spill file")
}

fn copy_chunked(reader: &mut dyn Read, out: &mut File, chunk_bytes: usize) -> std::io::Result<u64> {
    let mut buf = vec![0u8; chunk_bytes.max(1)];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        out.write_all(&buf[..n])?;
        total += n as u64;
    }
    Ok(total)
}

impl StagedJob {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Path of the spill file, if the input had to be copied.
    pub fn spill_path(&self) -> Option<&Path> {
        self.spill.as_ref().map(|s| s.path())
    }

    /// Path of the original file, if the input was opened in place.
    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    /// A filesystem path holding the job's bytes, if one exists already.
    pub fn path(&self) -> Option<&Path> {
        self.origin().or_else(|| self.spill_path())
    }

    /// Returns a path for external helpers, spilling a path-less seekable
    /// handle to a temporary file first.
    pub fn materialize(&mut self) -> Result<PathBuf> {
        if let Some(p) = self.path() {
            return Ok(p.to_path_buf());
        }
        let mut tmp = new_spill_file(&self.staging)?;
        self.rewind()?;
        let chunk = self.staging.chunk_bytes;
        copy_chunked(&mut self.handle, tmp.as_file_mut(), chunk)
            .io_context(format_args!("spill {} to {}", self.name, tmp.path().display()))?;
        tmp.as_file_mut()
            .flush()
            .io_context(format_args!("flush {}", tmp.path().display()))?;
        self.rewind()?;
        let path = tmp.path().to_path_buf();
        self.spill = Some(tmp);
        Ok(path)
    }

    pub fn rewind(&mut self) -> Result<()> {
        self.handle
            .seek(SeekFrom::Start(0))
            .io_context(format_args!("rewind {}", self.name))?;
        Ok(())
    }

    /// Buffered reader positioned at the start of the job.
    pub fn reader(&mut self) -> Result<BufReader<&mut dyn ReadSeek>> {
        self.rewind()?;
        Ok(BufReader::with_capacity(64 * KILOBYTE, &mut *self.handle))
    }

    /// Reads the whole job into memory.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        self.rewind()?;
        let mut buf = Vec::with_capacity(self.size as usize);
        self.handle
            .read_to_end(&mut buf)
            .io_context(format_args!("read {}", self.name))?;
        Ok(buf)
    }

    /// Captures the head and tail windows used for format detection.
    /// The tail window is empty when the job is shorter than it.
    pub fn signature_windows(&mut self) -> Result<SignatureWindows> {
        self.rewind()?;
        let mut first = Vec::with_capacity(FIRST_BLOCK_SIZE);
        (&mut self.handle)
            .take(FIRST_BLOCK_SIZE as u64)
            .read_to_end(&mut first)
            .io_context(format_args!("read first block of {}", self.name))?;

        let last = if self.size >= LAST_BLOCK_SIZE as u64 {
            let mut last = Vec::with_capacity(LAST_BLOCK_SIZE);
            match self.handle.seek(SeekFrom::End(-(LAST_BLOCK_SIZE as i64))) {
                Ok(_) => {
                    (&mut self.handle)
                        .take(LAST_BLOCK_SIZE as u64)
                        .read_to_end(&mut last)
                        .io_context(format_args!("read last block of {}", self.name))?;
                }
                Err(e) => debug!(input = %self.name, "no last block: {e}"),
            }
            last
        } else {
            Vec::new()
        };

        self.rewind()?;
        Ok(SignatureWindows::new(first, last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn short_job_has_no_last_block() {
        let src = JobSource::seekable("mem", Cursor::new(b"hello".to_vec()));
        let mut job = stage(src, &Staging::default()).unwrap();
        let w = job.signature_windows().unwrap();
        assert_eq!(w.first(), b"hello");
        assert!(w.last().is_empty());
    }

    #[test]
    fn windows_are_head_and_tail() {
        let data: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
        let src = JobSource::seekable("mem", Cursor::new(data.clone()));
        let mut job = stage(src, &Staging::default()).unwrap();
        let w = job.signature_windows().unwrap();
        assert_eq!(w.first(), &data[..FIRST_BLOCK_SIZE]);
        assert_eq!(w.last(), &data[data.len() - LAST_BLOCK_SIZE..]);
    }

    #[test]
    fn materialize_spills_seekable_handle() {
        let src = JobSource::seekable("mem", Cursor::new(b"%!PS\n".to_vec()));
        let mut job = stage(src, &Staging::default()).unwrap();
        assert!(job.path().is_none());
        let path = job.materialize().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"%!PS\n");
        drop(job);
        assert!(!path.exists());
    }
}
