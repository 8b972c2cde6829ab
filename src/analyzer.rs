//! Entry point for counting one job: stage, detect (once), count, close.

use crate::{
    config::Config,
    detect,
    error::{AnalysisError, PdlError},
    parsers::{Format, PdlParser, SignatureWindows},
    stage::{self, JobSource, StagedJob},
};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Once;
use tracing::{debug, info, warn};

/// Colour model hint for formats where it changes sheet semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorSpace {
    Bw,
    Rgb,
    Cmyk,
    Cmy,
    Gc,
}

/// Advisory knobs. None of them change a count for the formats handled
/// here; `debug` raises logging of the detection trace.
#[derive(Debug, Clone, Default)]
pub struct AnalyzerOptions {
    pub debug: bool,
    pub colorspace: Option<ColorSpace>,
    /// Dots per inch, for raster formats without explicit dimensions.
    pub resolution: Option<u32>,
}

static DEPRECATED_DETECT: Once = Once::new();

pub struct Analyzer {
    name: String,
    options: AnalyzerOptions,
    cfg: Config,
    source: Option<JobSource>,
    staged: Option<StagedJob>,
    windows: Option<SignatureWindows>,
    parser: Option<Box<dyn PdlParser>>,
}

impl Analyzer {
    pub fn new(source: JobSource, options: AnalyzerOptions, cfg: &Config) -> Self {
        Self {
            name: source.name(),
            options,
            cfg: cfg.clone(),
            source: Some(source),
            staged: None,
            windows: None,
            parser: None,
        }
    }

    /// Identity of the input, as used in error reports.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.staged.is_some()
    }

    /// Stages the input. Does nothing when already open.
    pub fn open(&mut self) -> Result<(), AnalysisError> {
        if self.staged.is_some() {
            return Ok(());
        }
        let source = self.source.take().ok_or_else(|| {
            self.wrap(PdlError::io(
                "reopen",
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "stream input was already consumed",
                ),
            ))
        })?;
        if self.options.debug {
            info!(
                input = %self.name,
                colorspace = ?self.options.colorspace,
                resolution = ?self.options.resolution,
                "opening"
            );
        }
        let staged = stage::stage(source, &self.cfg.staging).map_err(|e| self.wrap(e))?;
        self.staged = Some(staged);
        Ok(())
    }

    /// Releases the staged input; a spill file is deleted here. Inputs
    /// opened from a path can be opened again.
    pub fn close(&mut self) {
        if let Some(staged) = self.staged.take() {
            if let Some(origin) = staged.origin() {
                self.source = Some(JobSource::Path(origin.to_path_buf()));
            }
            debug!(input = %self.name, "closed");
        }
    }

    /// Path of the spill file while the job is open, if one was needed.
    pub fn spill_path(&self) -> Option<PathBuf> {
        self.staged
            .as_ref()
            .and_then(|s| s.spill_path().map(Path::to_path_buf))
    }

    /// The bound parser, detecting the format on first use.
    pub fn pdl_handler(&mut self) -> Result<&dyn PdlParser, AnalysisError> {
        if self.parser.is_none() {
            self.open()?;
            let parser = self.detect_format().map_err(|e| self.wrap(e))?;
            self.parser = Some(parser);
        }
        match self.parser.as_deref() {
            Some(p) => Ok(p),
            None => Err(self.wrap(PdlError::UnrecognizedFormat {
                input: self.name.clone(),
            })),
        }
    }

    #[deprecated(note = "use `pdl_handler`")]
    pub fn detect_pdl_handler(&mut self) -> Result<&dyn PdlParser, AnalysisError> {
        DEPRECATED_DETECT.call_once(|| {
            warn!("Analyzer::detect_pdl_handler is deprecated, use Analyzer::pdl_handler");
        });
        self.pdl_handler()
    }

    pub fn format(&mut self) -> Result<Format, AnalysisError> {
        Ok(self.pdl_handler()?.format())
    }

    /// Signature windows captured during detection.
    pub fn signature_windows(&self) -> Option<&SignatureWindows> {
        self.windows.as_ref()
    }

    /// Size in bytes of the staged input, while open.
    pub fn staged_size(&self) -> Option<u64> {
        self.staged.as_ref().map(StagedJob::size)
    }

    fn detect_format(&mut self) -> Result<Box<dyn PdlParser>, PdlError> {
        let Some(staged) = self.staged.as_mut() else {
            return Err(PdlError::io(
                "detect",
                std::io::Error::other("input is not open"),
            ));
        };
        if staged.size() == 0 {
            return Err(PdlError::EmptyInput {
                input: self.name.clone(),
            });
        }
        let windows = staged.signature_windows()?;
        let detected = detect::detect(&windows, &self.cfg, &self.name);
        self.windows = Some(windows);
        let parser = detected?;
        if self.options.debug {
            info!(input = %self.name, format = %parser.format(), "detected");
        }
        Ok(parser)
    }

    /// Counts the job's pages. The input is closed afterwards whatever the
    /// outcome.
    pub fn job_size(&mut self) -> Result<u64, AnalysisError> {
        let result = self.count_open();
        self.close();
        result
    }

    fn count_open(&mut self) -> Result<u64, AnalysisError> {
        self.open()?;
        self.pdl_handler()?;
        let (Some(parser), Some(staged)) = (self.parser.as_deref(), self.staged.as_mut()) else {
            return Err(AnalysisError::new(
                &self.name,
                PdlError::io("count", std::io::Error::other("input is not open")),
            ));
        };
        let pages = parser.job_size(staged).map_err(|e| AnalysisError::new(&self.name, e))?;
        debug!(input = %self.name, format = %parser.format(), pages, "counted");
        Ok(pages)
    }

    fn wrap(&self, error: PdlError) -> AnalysisError {
        AnalysisError::new(&self.name, error)
    }
}

impl Drop for Analyzer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Counts the pages of a single source.
pub fn job_size(
    source: JobSource,
    options: AnalyzerOptions,
    cfg: &Config,
) -> Result<u64, AnalysisError> {
    Analyzer::new(source, options, cfg).job_size()
}
