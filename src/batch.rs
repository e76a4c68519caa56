use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::TrimConfig;
use crate::processor::{ClipProcessor, Outcome, ProcessingResult};
use crate::video::VideoBackend;

/// Shared stop flag, checked between clips and between samples.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One input clip and where its trimmed copy goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipJob {
    pub input: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub results: Vec<ProcessingResult>,
    /// Jobs that were never started because the batch was cancelled.
    pub not_started: usize,
}

impl BatchReport {
    pub fn count(&self, outcome: Outcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn has_failures(&self) -> bool {
        self.count(Outcome::Failed) > 0
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        for result in &self.results {
            out.push_str(&result.to_string());
            out.push('\n');
        }
        out.push_str(&format!(
            "{} clip(s): {} succeeded, {} skipped, {} failed",
            self.results.len(),
            self.count(Outcome::Success),
            self.count(Outcome::Skipped),
            self.count(Outcome::Failed)
        ));
        if self.not_started > 0 {
            out.push_str(&format!(", {} not started (cancelled)", self.not_started));
        }
        out
    }
}

/// Processes clips one after another; a failing clip never stops the batch.
pub struct BatchRunner<'a, B> {
    processor: ClipProcessor<'a, B>,
    cancel: CancelToken,
}

impl<'a, B: VideoBackend> BatchRunner<'a, B> {
    pub fn new(backend: &'a B, config: &'a TrimConfig, cancel: CancelToken) -> Self {
        Self {
            processor: ClipProcessor::new(backend, config, cancel.clone()),
            cancel,
        }
    }

    pub fn run(&self, jobs: &[ClipJob]) -> BatchReport {
        let mut report = BatchReport::default();
        for (i, job) in jobs.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.not_started = jobs.len() - i;
                warn!(remaining = report.not_started, "batch cancelled");
                break;
            }
            info!("[{}/{}] {}", i + 1, jobs.len(), job.input.display());
            report.results.push(self.processor.process(&job.input, &job.output));
        }
        report
    }
}
