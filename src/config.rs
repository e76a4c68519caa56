use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrimError};

/// Full set of knobs for one batch. Passed explicitly into the batch runner
/// and the clip processor; nothing reads process-wide defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrimConfig {
    pub sampling: SamplingConfig,
    pub flow: FlowConfig,
    pub detector: DetectorConfig,
    pub planner: PlannerConfig,
    pub normalize: Normalization,
    /// Prepended to the input file name to build the output file name.
    pub output_prefix: String,
    /// Plan every clip but write nothing.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Analyse every `stride`-th decoded frame.
    pub stride: u32,
    /// Resolution frames are rescaled to before flow is computed.
    pub analysis_size: AnalysisSize,
    /// Frames with a timestamp before this are never analysed.
    pub skip_lead_in_secs: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            stride: 1,
            analysis_size: AnalysisSize {
                width: 384,
                height: 216,
            },
            skip_lead_in_secs: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSize {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for AnalysisSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for AnalysisSize {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(|c: char| c == 'x' || c == 'X')
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got `{}`", s))?;
        let width = w.trim().parse::<u32>().map_err(|e| e.to_string())?;
        let height = h.trim().parse::<u32>().map_err(|e| e.to_string())?;
        Ok(AnalysisSize { width, height })
    }
}

/// Parameters of the pyramidal Lucas-Kanade flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub pyramid_levels: u32,
    /// Half size of the square integration window.
    pub window_radius: u32,
    pub iterations: u32,
    /// Flow is evaluated every `grid_step` pixels in both axes.
    pub grid_step: u32,
    pub region: Region,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            pyramid_levels: 3,
            window_radius: 7,
            iterations: 3,
            grid_step: 4,
            region: Region::default(),
        }
    }
}

/// Region of interest as fractions of the frame. Defaults to the central half
/// in both axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Region {
    pub const FULL: Region = Region {
        left: 0.0,
        top: 0.0,
        right: 1.0,
        bottom: 1.0,
    };

    /// Pixel bounds `(x0, y0, x1, y1)` of this region in a `width` x `height`
    /// frame, end-exclusive.
    pub fn bounds(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let px = |f: f32, n: u32| ((f * n as f32).round() as u32).min(n);
        (
            px(self.left, width),
            px(self.top, height),
            px(self.right, width),
            px(self.bottom, height),
        )
    }
}

impl Default for Region {
    fn default() -> Self {
        Region {
            left: 0.25,
            top: 0.25,
            right: 0.75,
            bottom: 0.75,
        }
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("full") {
            return Ok(Region::FULL);
        }
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<f32>().map_err(|e| e.to_string()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        match parts.as_slice() {
            [left, top, right, bottom] => Ok(Region {
                left: *left,
                top: *top,
                right: *right,
                bottom: *bottom,
            }),
            _ => Err(format!("expected `full` or LEFT,TOP,RIGHT,BOTTOM, got `{}`", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub t_high: f64,
    pub t_low: f64,
    /// Further samples that must stay at or above `t_low` to confirm takeoff.
    pub dwell: u32,
    /// Trailing moving-average window applied before detection. 1 disables it.
    pub smoothing_window: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            t_high: 8.0,
            t_low: 5.0,
            dwell: 10,
            smoothing_window: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Seconds kept before the detected onset.
    pub margin_secs: f64,
    pub fallback: FallbackPolicy,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            margin_secs: 1.0,
            fallback: FallbackPolicy::KeepWholeClip,
        }
    }
}

/// What to do with a clip in which no takeoff was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackPolicy {
    /// Write the whole clip untouched.
    KeepWholeClip,
    /// Write nothing for this clip.
    SkipOutput,
}

/// How raw flow magnitudes are scaled before thresholds apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Normalization {
    /// Pixels per sampled interval at analysis resolution.
    #[default]
    None,
    /// Thousandths of the frame width per sampled interval.
    Resolution,
    /// Thousandths of the frame width per 1/30 s.
    ResolutionAndFrameRate,
}

const REFERENCE_WIDTH: f64 = 1000.0;
const REFERENCE_FPS: f64 = 30.0;

impl Normalization {
    /// Factor applied to raw intensities of a clip sampled at `stride` from a
    /// source running at `fps`, analysed at `analysis_width` pixels.
    pub fn factor(&self, analysis_width: u32, stride: u32, fps: f64) -> f64 {
        let resolution = REFERENCE_WIDTH / analysis_width.max(1) as f64;
        match self {
            Normalization::None => 1.0,
            Normalization::Resolution => resolution,
            Normalization::ResolutionAndFrameRate => {
                if fps > 0.0 {
                    resolution * stride.max(1) as f64 * REFERENCE_FPS / fps
                } else {
                    resolution
                }
            }
        }
    }
}

impl TrimConfig {
    /// Reads a JSON configuration file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| TrimError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.sampling;
        if s.stride == 0 {
            return Err(TrimError::Config("stride must be at least 1".into()));
        }
        if s.analysis_size.width < 8 || s.analysis_size.height < 8 {
            return Err(TrimError::Config(format!(
                "analysis size {} is too small",
                s.analysis_size
            )));
        }
        if !s.skip_lead_in_secs.is_finite() || s.skip_lead_in_secs < 0.0 {
            return Err(TrimError::Config("lead-in skip must be >= 0".into()));
        }

        let f = &self.flow;
        if f.pyramid_levels == 0 || f.iterations == 0 || f.grid_step == 0 || f.window_radius == 0 {
            return Err(TrimError::Config(
                "pyramid levels, iterations, grid step and window radius must be >= 1".into(),
            ));
        }
        let r = f.region;
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if !(in_unit(r.left) && in_unit(r.top) && in_unit(r.right) && in_unit(r.bottom))
            || r.left >= r.right
            || r.top >= r.bottom
        {
            return Err(TrimError::Config(format!("bad region of interest {:?}", r)));
        }

        let d = &self.detector;
        if !d.t_high.is_finite() || !d.t_low.is_finite() || d.t_low < 0.0 {
            return Err(TrimError::Config("thresholds must be finite and >= 0".into()));
        }
        if d.t_low > d.t_high {
            return Err(TrimError::Config(format!(
                "t_low ({}) must not exceed t_high ({})",
                d.t_low, d.t_high
            )));
        }
        if d.smoothing_window == 0 {
            return Err(TrimError::Config("smoothing window must be >= 1".into()));
        }

        if !self.planner.margin_secs.is_finite() || self.planner.margin_secs < 0.0 {
            return Err(TrimError::Config("safety margin must be >= 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        TrimConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let mut config = TrimConfig::default();
        config.detector.t_low = 9.0;
        config.detector.t_high = 8.0;
        assert!(matches!(config.validate(), Err(TrimError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_stride() {
        let mut config = TrimConfig::default();
        config.sampling.stride = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_analysis_size() {
        let size: AnalysisSize = "320x180".parse().unwrap();
        assert_eq!(size, AnalysisSize { width: 320, height: 180 });
        assert!("320".parse::<AnalysisSize>().is_err());
    }

    #[test]
    fn test_parse_region() {
        assert_eq!("full".parse::<Region>().unwrap(), Region::FULL);
        let r: Region = "0.1,0.2,0.9,0.8".parse().unwrap();
        assert_eq!(r.bounds(100, 100), (10, 20, 90, 80));
        assert!("0.1,0.2".parse::<Region>().is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: TrimConfig =
            serde_json::from_str(r#"{"detector": {"t_high": 12.0}, "planner": {"fallback": "skip-output"}}"#)
                .unwrap();
        assert_eq!(config.detector.t_high, 12.0);
        assert_eq!(config.detector.t_low, 5.0);
        assert_eq!(config.planner.fallback, FallbackPolicy::SkipOutput);
        assert_eq!(config.sampling.stride, 1);
    }

    #[test]
    fn test_normalization_factor() {
        assert_eq!(Normalization::None.factor(500, 2, 60.0), 1.0);
        assert_eq!(Normalization::Resolution.factor(500, 2, 60.0), 2.0);
        // 2 frames at 60 fps is one 1/30 s interval
        assert_eq!(Normalization::ResolutionAndFrameRate.factor(500, 2, 60.0), 2.0);
        assert_eq!(Normalization::ResolutionAndFrameRate.factor(500, 1, 60.0), 1.0);
    }
}
