//! Counting many inputs in one go. Failures are collected per input and
//! never stop the batch; an interrupt stops it after the current input.

use crate::{
    analyzer::{Analyzer, AnalyzerOptions},
    config::Config,
    error::AnalysisError,
    report::JobCount,
    stage::JobSource,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{error, info, warn};

#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Sum over successfully counted inputs only.
    pub total: u64,
    pub counted: Vec<JobCount>,
    pub failures: Vec<AnalysisError>,
    pub interrupted: bool,
}

/// Operator interrupt shared between a batch and a signal handler. The
/// batch publishes its running total here so a handler can report it when
/// the current input never finishes.
#[derive(Debug, Default)]
pub struct Interrupt {
    requested: AtomicBool,
    partial_total: AtomicU64,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a request. Returns `true` if one was already pending.
    pub fn request(&self) -> bool {
        self.requested.swap(true, Ordering::SeqCst)
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Sum of the inputs counted so far.
    pub fn partial_total(&self) -> u64 {
        self.partial_total.load(Ordering::SeqCst)
    }

    fn publish(&self, total: u64) {
        self.partial_total.store(total, Ordering::SeqCst);
    }
}

/// Counts every source in order. `interrupt` is polled between inputs.
pub fn count_sources<I>(
    sources: I,
    options: &AnalyzerOptions,
    cfg: &Config,
    interrupt: &Interrupt,
) -> BatchOutcome
where
    I: IntoIterator<Item = JobSource>,
{
    let mut outcome = BatchOutcome::default();
    interrupt.publish(0);
    for source in sources {
        if interrupt.is_requested() {
            warn!("aborted at user's request");
            outcome.interrupted = true;
            break;
        }
        let mut analyzer = Analyzer::new(source, options.clone(), cfg);
        match count_one(&mut analyzer) {
            Ok(count) => {
                info!(input = %count.input, format = %count.format, pages = count.pages, "counted");
                outcome.total += count.pages;
                interrupt.publish(outcome.total);
                outcome.counted.push(count);
            }
            Err(err) => {
                error!("{err}");
                outcome.failures.push(err);
            }
        }
    }
    outcome
}

/// Counts inputs named on the command line (`-` is stdin).
pub fn count_inputs(
    inputs: &[String],
    options: &AnalyzerOptions,
    cfg: &Config,
    interrupt: &Interrupt,
) -> BatchOutcome {
    count_sources(inputs.iter().map(|a| JobSource::from_arg(a)), options, cfg, interrupt)
}

fn count_one(analyzer: &mut Analyzer) -> Result<JobCount, AnalysisError> {
    let format = match analyzer.format() {
        Ok(f) => f,
        Err(e) => {
            analyzer.close();
            return Err(e);
        }
    };
    let pages = analyzer.job_size()?;
    Ok(JobCount {
        input: analyzer.name().to_string(),
        format,
        pages,
    })
}
