use image::imageops::{self, FilterType};
use image::GrayImage;

use crate::config::AnalysisSize;
use crate::error::Result;
use crate::video::{FrameInfo, FrameSource};

/// A frame prepared for flow computation: grayscale, at analysis resolution.
#[derive(Debug, Clone)]
pub struct AnalysisFrame {
    pub info: FrameInfo,
    pub gray: GrayImage,
}

/// Pulls every `stride`-th frame from a source after an optional lead-in,
/// converting each to an [`AnalysisFrame`]. Frames that are not sampled are
/// decoded but never converted.
pub struct FrameSampler<S> {
    source: S,
    stride: u32,
    lead_in: u64,
    size: Option<AnalysisSize>,
    started: bool,
    finished: bool,
    last_index: Option<u64>,
    decoded: u64,
}

impl<S: FrameSource> FrameSampler<S> {
    pub fn new(source: S, stride: u32, lead_in: u64, size: Option<AnalysisSize>) -> Self {
        Self {
            source,
            stride: stride.max(1),
            lead_in,
            size,
            started: false,
            finished: false,
            last_index: None,
            decoded: 0,
        }
    }

    /// Frames pulled from the source so far, sampled or not.
    pub fn decoded(&self) -> u64 {
        self.decoded
    }

    /// Skips `n` frames, returns false when the source ran dry.
    fn skip(&mut self, n: u64) -> Result<bool> {
        for _ in 0..n {
            if self.source.skip_frame()?.is_none() {
                return Ok(false);
            }
            self.decoded += 1;
        }
        Ok(true)
    }

    fn pull(&mut self) -> Result<Option<AnalysisFrame>> {
        let to_skip = if self.started {
            self.stride as u64 - 1
        } else {
            self.started = true;
            self.lead_in
        };
        if !self.skip(to_skip)? {
            return Ok(None);
        }

        let frame = match self.source.next_frame()? {
            Some(frame) => frame,
            None => return Ok(None),
        };
        self.decoded += 1;

        if let Some(last) = self.last_index {
            debug_assert!(frame.info.index > last, "frame indices must increase");
        }
        self.last_index = Some(frame.info.index);

        let gray = imageops::grayscale(&frame.image);
        let gray = match self.size {
            Some(size) if (size.width, size.height) != gray.dimensions() => {
                imageops::resize(&gray, size.width, size.height, FilterType::Triangle)
            }
            _ => gray,
        };

        Ok(Some(AnalysisFrame {
            info: frame.info,
            gray,
        }))
    }
}

impl<S: FrameSource> Iterator for FrameSampler<S> {
    type Item = Result<AnalysisFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.pull() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use image::RgbImage;

    use super::*;
    use crate::error::TrimError;
    use crate::video::Frame;

    /// Source producing `count` solid frames, failing at `fail_at` if set.
    pub(crate) struct SolidSource {
        pub next: u64,
        pub count: u64,
        pub fail_at: Option<u64>,
        pub converted: Vec<u64>,
    }

    impl SolidSource {
        pub fn new(count: u64) -> Self {
            Self {
                next: 0,
                count,
                fail_at: None,
                converted: Vec::new(),
            }
        }

        fn advance(&mut self) -> Result<Option<FrameInfo>> {
            if Some(self.next) == self.fail_at {
                return Err(TrimError::decode("truncated packet"));
            }
            if self.next >= self.count {
                return Ok(None);
            }
            let info = FrameInfo {
                index: self.next,
                timestamp: Duration::from_millis(self.next * 40),
            };
            self.next += 1;
            Ok(Some(info))
        }
    }

    impl FrameSource for SolidSource {
        fn next_frame(&mut self) -> Result<Option<Frame>> {
            Ok(self.advance()?.map(|info| {
                self.converted.push(info.index);
                Frame {
                    info,
                    image: RgbImage::from_pixel(64, 48, image::Rgb([200, 100, 50])),
                }
            }))
        }

        fn skip_frame(&mut self) -> Result<Option<FrameInfo>> {
            self.advance()
        }
    }

    #[test]
    fn test_stride_and_lead_in() {
        let mut sampler = FrameSampler::new(SolidSource::new(10), 3, 2, None);
        let indices: Vec<u64> = sampler
            .by_ref()
            .map(|f| f.unwrap().info.index)
            .collect();

        assert_eq!(indices, vec![2, 5, 8]);
        assert_eq!(sampler.decoded(), 10);
        assert_eq!(sampler.source.converted, vec![2, 5, 8]);
    }

    #[test]
    fn test_rescales_to_analysis_size() {
        let size = AnalysisSize {
            width: 16,
            height: 12,
        };
        let mut sampler = FrameSampler::new(SolidSource::new(2), 1, 0, Some(size));
        let frame = sampler.next().unwrap().unwrap();

        assert_eq!(frame.gray.dimensions(), (16, 12));
        // luma of (200, 100, 50)
        let luma = frame.gray.get_pixel(8, 6)[0];
        assert!((115..=125).contains(&luma), "luma was {}", luma);
    }

    #[test]
    fn test_lead_in_past_end_is_empty() {
        let mut sampler = FrameSampler::new(SolidSource::new(3), 1, 5, None);
        assert!(sampler.next().is_none());
        assert_eq!(sampler.decoded(), 3);
    }

    #[test]
    fn test_decode_error_terminates() {
        let mut source = SolidSource::new(10);
        source.fail_at = Some(2);
        let mut sampler = FrameSampler::new(source, 1, 0, None);

        assert!(sampler.next().unwrap().is_ok());
        assert!(sampler.next().unwrap().is_ok());
        assert!(matches!(sampler.next(), Some(Err(TrimError::Decode { .. }))));
        assert!(sampler.next().is_none());
    }
}
