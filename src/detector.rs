use crate::config::DetectorConfig;

/// Sustained flight motion located in a motion series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TakeoffEvent {
    /// Index into the motion series of the sample where the rise began.
    pub sample_index: usize,
    /// 0.5 at exactly `t_high`, 1.0 at twice `t_high` or more.
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetectorState {
    Grounded,
    Rising {
        onset: usize,
        onset_intensity: f64,
        dwell: u32,
    },
    Flying(TakeoffEvent),
}

impl DetectorState {
    pub fn new() -> Self {
        DetectorState::Grounded
    }

    /// Feeds sample `index` with `intensity` and returns the next state.
    pub fn transition(&self, index: usize, intensity: f64, config: &DetectorConfig) -> DetectorState {
        match *self {
            DetectorState::Grounded => {
                if intensity > config.t_high {
                    DetectorState::Rising {
                        onset: index,
                        onset_intensity: intensity,
                        dwell: 0,
                    }
                    .confirm(config)
                } else {
                    DetectorState::Grounded
                }
            }

            DetectorState::Rising {
                onset,
                onset_intensity,
                dwell,
            } => {
                if intensity < config.t_low {
                    DetectorState::Grounded
                } else {
                    DetectorState::Rising {
                        onset,
                        onset_intensity,
                        dwell: dwell + 1,
                    }
                    .confirm(config)
                }
            }

            flying @ DetectorState::Flying(_) => flying,
        }
    }

    fn confirm(self, config: &DetectorConfig) -> DetectorState {
        match self {
            DetectorState::Rising {
                onset,
                onset_intensity,
                dwell,
            } if dwell >= config.dwell => DetectorState::Flying(TakeoffEvent {
                sample_index: onset,
                confidence: confidence(onset_intensity, config.t_high),
            }),
            other => other,
        }
    }
}

impl Default for DetectorState {
    fn default() -> Self {
        Self::new()
    }
}

fn confidence(onset_intensity: f64, t_high: f64) -> f64 {
    if t_high <= 0.0 {
        return 1.0;
    }
    0.5 + 0.5 * (onset_intensity / t_high - 1.0).clamp(0.0, 1.0)
}

/// Runs the grounded/rising/flying machine over `intensities` once, in order.
/// Returns the first confirmed takeoff, or `None` if the series ends before
/// one is confirmed.
pub fn detect_takeoff(intensities: &[f64], config: &DetectorConfig) -> Option<TakeoffEvent> {
    let mut state = DetectorState::new();
    for (index, &intensity) in intensities.iter().enumerate() {
        state = state.transition(index, intensity, config);
        if let DetectorState::Flying(event) = state {
            return Some(event);
        }
    }
    None
}

/// Trailing moving average over `window` samples. The first samples average
/// over what is available.
pub fn smooth(intensities: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 {
        return intensities.to_vec();
    }
    let mut out = Vec::with_capacity(intensities.len());
    let mut sum = 0.0;
    for (i, &v) in intensities.iter().enumerate() {
        sum += v;
        if i >= window {
            sum -= intensities[i - window];
        }
        out.push(sum / (i + 1).min(window) as f64);
    }
    out
}

/// Smooths with `config.smoothing_window`, detects, and moves the onset back
/// by the smoothing lag.
pub fn detect_smoothed(intensities: &[f64], config: &DetectorConfig) -> Option<TakeoffEvent> {
    let window = config.smoothing_window.max(1) as usize;
    let smoothed = smooth(intensities, window);
    detect_takeoff(&smoothed, config).map(|event| TakeoffEvent {
        sample_index: event.sample_index.saturating_sub(window - 1),
        ..event
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(t_high: f64, t_low: f64, dwell: u32) -> DetectorConfig {
        DetectorConfig {
            t_high,
            t_low,
            dwell,
            smoothing_window: 1,
        }
    }

    #[test]
    fn test_sustained_rise_is_detected_at_onset() {
        let series = [0.0, 0.0, 0.0, 9.0, 8.0, 7.0, 6.0, 5.0, 0.0];
        let event = detect_takeoff(&series, &config(8.0, 5.0, 3)).unwrap();
        assert_eq!(event.sample_index, 3);
        assert!((event.confidence - (0.5 + 0.5 / 8.0)).abs() < 1e-9);
    }

    #[test]
    fn test_broken_dwell_is_ignored() {
        let series = [0.0, 0.0, 9.0, 2.0, 0.0, 0.0];
        assert_eq!(detect_takeoff(&series, &config(8.0, 5.0, 3)), None);
    }

    #[test]
    fn test_below_low_threshold_never_fires() {
        let series: Vec<f64> = (0..200).map(|i| (i % 5) as f64).collect();
        assert_eq!(detect_takeoff(&series, &config(8.0, 5.0, 3)), None);
    }

    #[test]
    fn test_continues_past_false_starts() {
        let series = [0.0, 9.0, 1.0, 10.0, 6.0, 0.0, 12.0, 9.0, 9.0, 9.0, 0.0];
        let event = detect_takeoff(&series, &config(8.0, 5.0, 3)).unwrap();
        assert_eq!(event.sample_index, 6);
        assert_eq!(event.confidence, 0.75);
    }

    #[test]
    fn test_series_ending_while_rising_is_absent() {
        let series = [0.0, 9.0, 9.0, 9.0];
        assert_eq!(detect_takeoff(&series, &config(8.0, 5.0, 3)), None);
    }

    #[test]
    fn test_exactly_low_threshold_holds_dwell() {
        let series = [9.0, 5.0, 5.0, 5.0];
        assert_eq!(detect_takeoff(&series, &config(8.0, 5.0, 3)).unwrap().sample_index, 0);
    }

    #[test]
    fn test_zero_dwell_fires_immediately() {
        let series = [1.0, 20.0, 0.0];
        let event = detect_takeoff(&series, &config(8.0, 5.0, 0)).unwrap();
        assert_eq!(event.sample_index, 1);
        assert_eq!(event.confidence, 1.0);
    }

    #[test]
    fn test_onset_never_later_than_first_exceedance() {
        for start in 0..10 {
            let mut series = vec![1.0; 30];
            for v in series.iter_mut().skip(start) {
                *v = 9.5;
            }
            let event = detect_takeoff(&series, &config(8.0, 5.0, 4)).unwrap();
            assert_eq!(event.sample_index, start);
        }
    }

    #[test]
    fn test_flying_is_terminal() {
        let c = config(8.0, 5.0, 0);
        let state = DetectorState::new().transition(0, 9.0, &c);
        assert!(matches!(state, DetectorState::Flying(_)));
        assert_eq!(state.transition(1, 0.0, &c), state);
    }

    #[test]
    fn test_smooth_trailing_mean() {
        let out = smooth(&[3.0, 3.0, 6.0, 0.0], 2);
        assert_eq!(out, vec![3.0, 3.0, 4.5, 3.0]);
        assert_eq!(smooth(&[1.0, 2.0], 1), vec![1.0, 2.0]);
    }

    #[test]
    fn test_smoothed_onset_shifts_back_by_lag() {
        let c = DetectorConfig {
            smoothing_window: 3,
            ..config(8.0, 5.0, 2)
        };
        let series = [0.0, 0.0, 0.0, 0.0, 12.0, 12.0, 12.0, 12.0, 12.0, 12.0];
        // smoothed series reaches 8.0 at index 5 and first exceeds it at 6
        let event = detect_smoothed(&series, &c).unwrap();
        assert_eq!(event.sample_index, 4);
    }
}
