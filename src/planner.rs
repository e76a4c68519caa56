use std::fmt;
use std::time::Duration;

use crate::config::{FallbackPolicy, PlannerConfig};
use crate::detector::TakeoffEvent;
use crate::video::{Clip, FrameInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanPolicy {
    Detected,
    /// No takeoff found and nothing is written for the clip.
    FallbackNoTrim,
    /// No takeoff found and the clip is written whole.
    FallbackEntireClipKept,
}

impl fmt::Display for PlanPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PlanPolicy::Detected => "detected",
            PlanPolicy::FallbackNoTrim => "fallback-no-trim",
            PlanPolicy::FallbackEntireClipKept => "fallback-entire-clip-kept",
        })
    }
}

/// Where the output of one clip starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimPlan {
    /// Always within `[0, frame_count)`; 0 keeps everything.
    pub trim_frame_index: u64,
    pub trim_timestamp: Duration,
    pub policy_used: PlanPolicy,
    pub confidence: Option<f64>,
}

impl TrimPlan {
    pub fn writes_output(&self) -> bool {
        self.policy_used != PlanPolicy::FallbackNoTrim
    }
}

/// A confirmed takeoff located in the original clip: `frame` is the earlier
/// sampled frame of the pair that started the rise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Onset {
    pub event: TakeoffEvent,
    pub frame: FrameInfo,
}

impl Onset {
    /// Resolves `event` against the sampled frames it was detected on.
    pub fn locate(event: TakeoffEvent, sampled: &[FrameInfo]) -> Option<Self> {
        sampled
            .get(event.sample_index)
            .map(|frame| Onset { event, frame: *frame })
    }
}

pub fn plan_trim(clip: &Clip, onset: Option<Onset>, config: &PlannerConfig) -> TrimPlan {
    let onset = match onset {
        Some(onset) => onset,
        None => {
            let policy_used = match config.fallback {
                FallbackPolicy::KeepWholeClip => PlanPolicy::FallbackEntireClipKept,
                FallbackPolicy::SkipOutput => PlanPolicy::FallbackNoTrim,
            };
            return TrimPlan {
                trim_frame_index: 0,
                trim_timestamp: Duration::ZERO,
                policy_used,
                confidence: None,
            };
        }
    };

    let margin = if clip.fps > 0.0 {
        (config.margin_secs.max(0.0) * clip.fps).round() as u64
    } else {
        0
    };
    let last = clip.frame_count.saturating_sub(1);
    let trim_frame_index = onset.frame.index.saturating_sub(margin).min(last);

    // Decoded time of the onset, stepped back over the margin at the nominal rate.
    let back = clip.span(onset.frame.index.saturating_sub(trim_frame_index));
    let trim_timestamp = if trim_frame_index == 0 {
        Duration::ZERO
    } else {
        onset.frame.timestamp.saturating_sub(back)
    };

    TrimPlan {
        trim_frame_index,
        trim_timestamp,
        policy_used: PlanPolicy::Detected,
        confidence: Some(onset.event.confidence),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn clip(frame_count: u64, fps: f64) -> Clip {
        Clip {
            path: PathBuf::from("a.mp4"),
            frame_count,
            fps,
            width: 1920,
            height: 1080,
        }
    }

    /// Sampled frames `first, first + stride, ...` stamped at the nominal rate
    /// plus `offset`.
    fn sampled(first: u64, stride: u64, count: u64, fps: f64, offset: Duration) -> Vec<FrameInfo> {
        (0..count)
            .map(|i| {
                let index = first + i * stride;
                FrameInfo {
                    index,
                    timestamp: offset + Duration::from_secs_f64(index as f64 / fps),
                }
            })
            .collect()
    }

    fn onset(sample_index: usize, sampled: &[FrameInfo]) -> Option<Onset> {
        let event = TakeoffEvent {
            sample_index,
            confidence: 0.8,
        };
        Onset::locate(event, sampled)
    }

    fn config(margin_secs: f64, fallback: FallbackPolicy) -> PlannerConfig {
        PlannerConfig {
            margin_secs,
            fallback,
        }
    }

    #[test]
    fn test_maps_sample_back_through_stride() {
        let frames = sampled(120, 2, 1000, 30.0, Duration::ZERO);
        let plan = plan_trim(&clip(3000, 30.0), onset(100, &frames), &config(1.0, FallbackPolicy::KeepWholeClip));

        // 120 + 100 * 2 = 320, minus 30 frames of margin
        assert_eq!(plan.trim_frame_index, 290);
        assert_eq!(plan.policy_used, PlanPolicy::Detected);
        assert_eq!(plan.confidence, Some(0.8));
        assert!((plan.trim_timestamp.as_secs_f64() - 290.0 / 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_timestamp_follows_decoded_time() {
        // Frames decoded 0.5 s later than their nominal position.
        let frames = sampled(0, 1, 300, 25.0, Duration::from_millis(500));
        let plan = plan_trim(&clip(300, 25.0), onset(100, &frames), &config(1.0, FallbackPolicy::KeepWholeClip));

        assert_eq!(plan.trim_frame_index, 75);
        assert!((plan.trim_timestamp.as_secs_f64() - 3.5).abs() < 1e-6);
    }

    #[test]
    fn test_margin_clamps_at_zero() {
        let frames = sampled(0, 1, 300, 30.0, Duration::from_millis(200));
        let plan = plan_trim(&clip(300, 30.0), onset(10, &frames), &config(2.0, FallbackPolicy::KeepWholeClip));
        assert_eq!(plan.trim_frame_index, 0);
        assert_eq!(plan.trim_timestamp, Duration::ZERO);
        assert_eq!(plan.policy_used, PlanPolicy::Detected);
    }

    #[test]
    fn test_boundary_stays_inside_clip() {
        let frames = sampled(0, 4, 600, 25.0, Duration::ZERO);
        let c = config(0.0, FallbackPolicy::KeepWholeClip);
        for frame_count in [0u64, 1, 10, 100] {
            for sample in [0usize, 5, 50, 500] {
                let plan = plan_trim(&clip(frame_count, 25.0), onset(sample, &frames), &c);
                assert!(plan.trim_frame_index < frame_count.max(1));
            }
        }
    }

    #[test]
    fn test_locate_out_of_range_is_none() {
        let frames = sampled(0, 1, 3, 25.0, Duration::ZERO);
        assert!(onset(3, &frames).is_none());
        assert_eq!(onset(2, &frames).map(|o| o.frame.index), Some(2));
    }

    #[test]
    fn test_fallback_policies() {
        let keep = plan_trim(&clip(300, 30.0), None, &config(1.0, FallbackPolicy::KeepWholeClip));
        assert_eq!(keep.trim_frame_index, 0);
        assert_eq!(keep.policy_used, PlanPolicy::FallbackEntireClipKept);
        assert!(keep.writes_output());

        let skip = plan_trim(&clip(300, 30.0), None, &config(1.0, FallbackPolicy::SkipOutput));
        assert_eq!(skip.trim_frame_index, 0);
        assert_eq!(skip.policy_used, PlanPolicy::FallbackNoTrim);
        assert!(!skip.writes_output());
        assert_eq!(skip.policy_used.to_string(), "fallback-no-trim");
    }
}
