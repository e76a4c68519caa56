use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ffmpeg_next::util::error::EAGAIN;
use ffmpeg_next::{self as ffmpeg, format, media::Type, Packet};
use ffmpeg_next::software::scaling;
use ffmpeg_next::util::frame;
use image::RgbImage;
use tracing::{debug, warn};

use crate::error::{Result, TrimError};
use crate::planner::TrimPlan;
use crate::video::{Clip, Frame, FrameInfo, FrameSource, VideoBackend};

/// Decodes with libavcodec and writes trimmed clips by stream copy.
#[derive(Debug, Clone, Copy)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn new() -> Result<Self> {
        ffmpeg::init().map_err(TrimError::decode)?;
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
        Ok(FfmpegBackend)
    }
}

/// Frame stream of one open input. Dropping it closes the file.
pub struct FfmpegFrames {
    ictx: format::context::Input,
    decoder: ffmpeg::decoder::Video,
    stream_index: usize,
    time_base: ffmpeg::Rational,
    /// First pts of the video stream; frame timestamps count from here.
    start_pts: i64,
    fps: f64,
    scaler: Option<(scaling::Context, (ffmpeg::format::Pixel, u32, u32))>,
    decoded: frame::Video,
    next_index: u64,
    eof_sent: bool,
}

impl FfmpegFrames {
    /// Feeds the decoder the next packet of the video stream, or EOF once the
    /// container is exhausted. Read errors other than EOF are fatal.
    fn send_next_packet(&mut self) -> Result<()> {
        loop {
            let mut packet = Packet::empty();
            match packet.read(&mut self.ictx) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => {
                    self.decoder.send_eof().map_err(TrimError::decode)?;
                    self.eof_sent = true;
                    return Ok(());
                }
                Err(err) => {
                    return Err(TrimError::decode(format!(
                        "reading packet after frame {}: {}",
                        self.next_index, err
                    )))
                }
            }
            if packet.stream() == self.stream_index {
                return self.decoder.send_packet(&packet).map_err(TrimError::decode);
            }
        }
    }

    /// Decodes the next frame into `self.decoded`.
    fn receive(&mut self) -> Result<Option<FrameInfo>> {
        loop {
            match self.decoder.receive_frame(&mut self.decoded) {
                Ok(()) => return Ok(Some(self.frame_info())),
                Err(ffmpeg::Error::Other { errno: EAGAIN }) if !self.eof_sent => self.send_next_packet()?,
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(err) => {
                    return Err(TrimError::decode(format!(
                        "decoding frame {}: {}",
                        self.next_index, err
                    )))
                }
            }
        }
    }

    fn frame_info(&mut self) -> FrameInfo {
        let index = self.next_index;
        self.next_index += 1;
        let timestamp = match self.decoded.timestamp().or_else(|| self.decoded.pts()) {
            Some(ts) => {
                let secs = (ts - self.start_pts) as f64 * f64::from(self.time_base);
                Duration::from_secs_f64(secs.max(0.0))
            }
            None if self.fps > 0.0 => Duration::from_secs_f64(index as f64 / self.fps),
            None => Duration::ZERO,
        };
        FrameInfo { index, timestamp }
    }

    fn to_rgb(&mut self) -> Result<RgbImage> {
        let (width, height) = (self.decoded.width(), self.decoded.height());
        let key = (self.decoded.format(), width, height);
        if self.scaler.as_ref().map(|(_, k)| *k != key).unwrap_or(true) {
            let context = scaling::Context::get(
                key.0,
                width,
                height,
                ffmpeg::format::Pixel::RGB24,
                width,
                height,
                scaling::Flags::BILINEAR,
            )
            .map_err(TrimError::decode)?;
            self.scaler = Some((context, key));
        }

        let mut rgb = frame::Video::empty();
        if let Some((scaler, _)) = self.scaler.as_mut() {
            scaler.run(&self.decoded, &mut rgb).map_err(TrimError::decode)?;
        }

        let stride = rgb.stride(0);
        let row = width as usize * 3;
        let data = rgb.data(0);
        let mut pixels = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            let start = y * stride;
            pixels.extend_from_slice(&data[start..start + row]);
        }
        RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| TrimError::decode("converted frame has the wrong size"))
    }
}

impl FrameSource for FfmpegFrames {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let info = match self.receive()? {
            Some(info) => info,
            None => return Ok(None),
        };
        let image = self.to_rgb()?;
        Ok(Some(Frame { info, image }))
    }

    fn skip_frame(&mut self) -> Result<Option<FrameInfo>> {
        self.receive()
    }
}

impl VideoBackend for FfmpegBackend {
    type Source = FfmpegFrames;

    fn open(&self, path: &Path) -> Result<(Clip, FfmpegFrames)> {
        let ictx = format::input(&path).map_err(TrimError::decode)?;
        let (stream_index, time_base, start_pts, fps, frame_count, decoder) = {
            let stream = ictx
                .streams()
                .best(Type::Video)
                .ok_or_else(|| TrimError::decode("no video stream"))?;
            let time_base = stream.time_base();
            let start_pts = stream_start(stream.start_time());

            let mut fps = f64::from(stream.avg_frame_rate());
            if !fps.is_finite() || fps <= 0.0 {
                fps = f64::from(stream.rate());
            }
            if !fps.is_finite() || fps <= 0.0 {
                fps = 0.0;
            }

            let frame_count = if stream.frames() > 0 {
                stream.frames() as u64
            } else {
                let secs = if stream.duration() > 0 {
                    stream.duration() as f64 * f64::from(time_base)
                } else {
                    ictx.duration().max(0) as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE)
                };
                (secs * fps).round() as u64
            };

            let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .and_then(|c| c.decoder().video())
                .map_err(TrimError::decode)?;
            (stream.index(), time_base, start_pts, fps, frame_count, decoder)
        };

        let clip = Clip {
            path: path.to_path_buf(),
            frame_count,
            fps,
            width: decoder.width(),
            height: decoder.height(),
        };
        let frames = FfmpegFrames {
            ictx,
            decoder,
            stream_index,
            time_base,
            start_pts,
            fps,
            scaler: None,
            decoded: frame::Video::empty(),
            next_index: 0,
            eof_sent: false,
        };
        Ok((clip, frames))
    }

    fn write_trimmed(&self, clip: &Clip, plan: &TrimPlan, output: &Path) -> Result<()> {
        write_through_partial(output, |partial| remux_from(clip, plan, partial))
    }
}

fn stream_start(start_time: i64) -> i64 {
    if start_time == ffmpeg::ffi::AV_NOPTS_VALUE {
        0
    } else {
        start_time
    }
}

/// Hidden sibling of `output` that keeps its extension, so the muxer still
/// picks the container from the name.
fn partial_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    output.with_file_name(format!(".part-{}", name))
}

/// Runs `write` against a partial file and moves it over `output` only once
/// it succeeded. A failed write removes the partial file.
fn write_through_partial<F>(output: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let partial = partial_path(output);
    let written = write(partial.as_path()).and_then(|()| fs::rename(&partial, output).map_err(TrimError::write));
    if written.is_err() && partial.exists() {
        if let Err(err) = fs::remove_file(&partial) {
            warn!(path = %partial.display(), "could not remove partial output: {}", err);
        }
    }
    written
}

/// Stream-copies `clip` into `output`, starting at the keyframe at or before
/// the plan's boundary.
fn remux_from(clip: &Clip, plan: &TrimPlan, output: &Path) -> Result<()> {
    let mut ictx = format::input(&clip.path).map_err(TrimError::write)?;
    let mut octx = format::output(&output).map_err(TrimError::write)?;

    let (video_index, video_start) = {
        let video = ictx
            .streams()
            .best(Type::Video)
            .ok_or_else(|| TrimError::write("no video stream"))?;
        let start = stream_start(video.start_time()) as f64 * f64::from(video.time_base());
        (video.index(), start)
    };

    // input stream index -> (output stream index, input time base)
    let mut stream_map = vec![None; ictx.nb_streams() as usize];
    for istream in ictx.streams() {
        let medium = istream.parameters().medium();
        if medium != Type::Video && medium != Type::Audio && medium != Type::Subtitle {
            debug!(stream = istream.index(), ?medium, "not copied");
            continue;
        }
        let mut ostream = octx
            .add_stream(ffmpeg::encoder::find(ffmpeg::codec::Id::None))
            .map_err(TrimError::write)?;
        ostream.set_parameters(istream.parameters());
        unsafe {
            (*ostream.parameters().as_mut_ptr()).codec_tag = 0;
        }
        stream_map[istream.index()] = Some((ostream.index(), istream.time_base()));
    }
    octx.set_metadata(ictx.metadata().to_owned());
    octx.write_header().map_err(TrimError::write)?;

    let passthrough = plan.trim_frame_index == 0;
    if !passthrough {
        // Lands on the keyframe at or before the boundary.
        let boundary = video_start + plan.trim_timestamp.as_secs_f64();
        let target = (boundary * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64;
        ictx.seek(target, ..target).map_err(TrimError::write)?;
    }

    // Start of the output in seconds, taken from the first video keyframe.
    let mut origin: Option<f64> = None;
    for (istream, mut packet) in ictx.packets() {
        let (out_index, in_tb) = match stream_map.get(istream.index()).copied().flatten() {
            Some(mapped) => mapped,
            None => continue,
        };

        if !passthrough {
            let tb = f64::from(in_tb);
            let ts = packet.dts().or_else(|| packet.pts());
            if origin.is_none() && istream.index() == video_index && packet.is_key() {
                let start = ts.unwrap_or(0) as f64 * tb;
                debug!(start, "first keyframe after seek");
                origin = Some(start);
            }
            let Some(start) = origin else {
                continue;
            };
            if istream.index() != video_index && ts.map(|t| (t as f64 * tb) < start).unwrap_or(true) {
                continue;
            }
            let shift = (start / tb).round() as i64;
            packet.set_pts(packet.pts().map(|p| p - shift));
            packet.set_dts(packet.dts().map(|d| d - shift));
        }

        let out_tb = octx
            .stream(out_index)
            .ok_or_else(|| TrimError::write("output stream vanished"))?
            .time_base();
        packet.rescale_ts(in_tb, out_tb);
        packet.set_stream(out_index);
        packet.set_position(-1);
        packet.write_interleaved(&mut octx).map_err(TrimError::write)?;
    }

    octx.write_trailer().map_err(TrimError::write)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_path_keeps_extension() {
        let partial = partial_path(Path::new("out/trimmed_a.MP4"));
        assert_eq!(partial, PathBuf::from("out/.part-trimmed_a.MP4"));
    }

    #[test]
    fn test_failed_write_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("a.mp4");

        let result = write_through_partial(&output, |partial| {
            fs::write(partial, b"ftyp header only")?;
            Err(TrimError::write("No space left on device"))
        });

        assert!(matches!(result, Err(TrimError::Write { .. })));
        assert!(!output.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_failed_write_keeps_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("a.mp4");
        fs::write(&output, b"earlier run").unwrap();

        let result = write_through_partial(&output, |partial| {
            fs::write(partial, b"half")?;
            Err(TrimError::write("interrupted"))
        });

        assert!(result.is_err());
        assert_eq!(fs::read(&output).unwrap(), b"earlier run");
    }

    #[test]
    fn test_successful_write_is_moved_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("a.mp4");

        write_through_partial(&output, |partial| {
            fs::write(partial, b"complete")?;
            Ok(())
        })
        .unwrap();

        assert_eq!(fs::read(&output).unwrap(), b"complete");
        assert!(!partial_path(&output).exists());
    }
}
