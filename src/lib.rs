//! Removes the idle ground lead-in from FPV drone clips.
//!
//! Each clip is sampled, converted to a motion-intensity series with dense
//! optical flow, scanned for the grounded to flying transition, and copied
//! from just before that point onward.

pub mod batch;
pub mod config;
pub mod detector;
pub mod error;
pub mod ffmpeg;
pub mod motion;
pub mod planner;
pub mod processor;
pub mod sampler;
pub mod scan;
pub mod video;

pub use batch::{BatchReport, BatchRunner, CancelToken, ClipJob};
pub use config::TrimConfig;
pub use error::{Result, TrimError};
pub use processor::{ClipProcessor, Outcome, ProcessingResult};
