use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::batch::CancelToken;
use crate::config::TrimConfig;
use crate::detector::detect_smoothed;
use crate::error::{Result, TrimError};
use crate::motion::{MotionEstimator, MotionSample};
use crate::planner::{plan_trim, Onset, TrimPlan};
use crate::sampler::FrameSampler;
use crate::video::{Clip, FrameInfo, VideoBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Skipped,
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Outcome::Success => "success",
            Outcome::Skipped => "skipped",
            Outcome::Failed => "failed",
        })
    }
}

/// Final word on one clip.
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub clip: PathBuf,
    pub outcome: Outcome,
    pub output_path: Option<PathBuf>,
    pub error: Option<String>,
    pub plan: Option<TrimPlan>,
}

impl ProcessingResult {
    fn failed(clip: &Path, err: &TrimError) -> Self {
        let outcome = match err {
            TrimError::EmptyClip { .. } => Outcome::Skipped,
            _ => Outcome::Failed,
        };
        Self {
            clip: clip.to_path_buf(),
            outcome,
            output_path: None,
            error: Some(err.to_string()),
            plan: None,
        }
    }
}

impl fmt::Display for ProcessingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self
            .clip
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.clip.display().to_string());
        write!(f, "{:<8} {}", self.outcome, name)?;
        if let Some(plan) = &self.plan {
            write!(
                f,
                " [{} from frame {} ({:.2}s)]",
                plan.policy_used,
                plan.trim_frame_index,
                plan.trim_timestamp.as_secs_f64()
            )?;
        }
        if let Some(output) = &self.output_path {
            write!(f, " -> {}", output.display())?;
        }
        if let Some(error) = &self.error {
            write!(f, ": {}", error)?;
        }
        Ok(())
    }
}

/// Runs sampling, flow, detection and planning for one clip, then hands the
/// plan to the backend.
pub struct ClipProcessor<'a, B> {
    backend: &'a B,
    config: &'a TrimConfig,
    cancel: CancelToken,
}

impl<'a, B: VideoBackend> ClipProcessor<'a, B> {
    pub fn new(backend: &'a B, config: &'a TrimConfig, cancel: CancelToken) -> Self {
        Self {
            backend,
            config,
            cancel,
        }
    }

    /// Never fails: every error ends up in the returned result.
    pub fn process(&self, input: &Path, output: &Path) -> ProcessingResult {
        match self.run(input, output) {
            Ok(result) => result,
            Err(err) => {
                let result = ProcessingResult::failed(input, &err);
                match result.outcome {
                    Outcome::Skipped => warn!(clip = %input.display(), "skipped: {}", err),
                    _ => tracing::error!(clip = %input.display(), "failed: {}", err),
                }
                result
            }
        }
    }

    /// Computes the trim plan of `input` without writing anything.
    pub fn analyse(&self, input: &Path) -> Result<(Clip, TrimPlan)> {
        let started = Instant::now();
        let (clip, source) = self.backend.open(input)?;
        let sampling = &self.config.sampling;
        info!(
            clip = %input.display(),
            frames = clip.frame_count,
            fps = clip.fps,
            "analysing {}x{}",
            clip.width,
            clip.height
        );

        let lead_in = (sampling.skip_lead_in_secs * clip.fps).round().max(0.0) as u64;
        let mut sampler = FrameSampler::new(source, sampling.stride, lead_in, Some(sampling.analysis_size));
        let scale = self
            .config
            .normalize
            .factor(sampling.analysis_size.width, sampling.stride, clip.fps);
        let mut estimator = MotionEstimator::new(self.config.flow.clone(), scale);

        let tick = ((clip.fps / sampling.stride as f64).round() as usize).max(1);
        let mut samples: Vec<MotionSample> = Vec::new();
        let mut sampled: Vec<FrameInfo> = Vec::new();
        while let Some(frame) = sampler.next() {
            if self.cancel.is_cancelled() {
                return Err(TrimError::Cancelled);
            }
            let frame = frame?;
            sampled.push(frame.info);
            if let Some(sample) = estimator.push(&frame)? {
                samples.push(sample);
                if samples.len() % tick == 0 {
                    log_progress(&clip, sampler.decoded(), started);
                }
            }
        }

        if samples.len() < 2 {
            return Err(TrimError::EmptyClip {
                usable: samples.len(),
            });
        }

        // Container frame counts are estimates; trust what was decoded.
        let clip = Clip {
            frame_count: clip.frame_count.max(sampler.decoded()),
            ..clip
        };
        let intensities: Vec<f64> = samples.iter().map(|s| s.intensity).collect();
        let onset = detect_smoothed(&intensities, &self.config.detector)
            .and_then(|event| Onset::locate(event, &sampled));
        let plan = plan_trim(&clip, onset, &self.config.planner);

        match onset {
            Some(onset) => info!(
                clip = %input.display(),
                sample = onset.event.sample_index,
                rise_frame = samples[onset.event.sample_index].frame_index,
                confidence = onset.event.confidence,
                "takeoff at frame {} ({:.2}s)",
                plan.trim_frame_index,
                plan.trim_timestamp.as_secs_f64()
            ),
            None => warn!(clip = %input.display(), policy = %plan.policy_used, "no takeoff detected"),
        }
        debug!(
            clip = %input.display(),
            samples = samples.len(),
            elapsed = ?started.elapsed(),
            "analysis complete"
        );
        Ok((clip, plan))
    }

    fn run(&self, input: &Path, output: &Path) -> Result<ProcessingResult> {
        let (clip, plan) = self.analyse(input)?;

        let mut result = ProcessingResult {
            clip: input.to_path_buf(),
            outcome: Outcome::Success,
            output_path: None,
            error: None,
            plan: Some(plan),
        };

        if !plan.writes_output() {
            result.outcome = Outcome::Skipped;
            result.error = Some("no takeoff detected".to_string());
            return Ok(result);
        }
        if self.config.dry_run {
            return Ok(result);
        }

        self.backend.write_trimmed(&clip, &plan, output)?;
        info!(clip = %input.display(), output = %output.display(), "written");
        result.output_path = Some(output.to_path_buf());
        Ok(result)
    }
}

fn log_progress(clip: &Clip, decoded: u64, started: Instant) {
    let elapsed = started.elapsed().as_secs_f64();
    if clip.frame_count == 0 || decoded == 0 {
        debug!(frame = decoded, "analysing, elapsed {:.1}s", elapsed);
        return;
    }
    let progress = decoded as f64 / clip.frame_count as f64;
    let remaining = elapsed / decoded as f64 * clip.frame_count.saturating_sub(decoded) as f64;
    debug!(
        "frame {}/{} ({:.1}%), elapsed {:.1}s, remaining {:.1}s",
        decoded,
        clip.frame_count,
        progress * 100.0,
        elapsed,
        remaining
    );
}
