//! Animated GIF assembly from downloaded frames.
//!
//! Frames are rendered onto a fixed square canvas and encoded strictly in
//! [`FrameSet`] order; that order is the time axis of the animation.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{ImageReader, Rgba, RgbaImage};

use crate::config::AnimationConfig;
use crate::fetch::FetchSummary;
use crate::{Error, Result};

/// A successfully downloaded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameEntry {
    pub year: i32,
    pub path: PathBuf,
}

/// Downloaded frames in ascending year order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameSet {
    frames: Vec<FrameEntry>,
}

impl FrameSet {
    pub fn new(frames: impl IntoIterator<Item = (i32, PathBuf)>) -> Self {
        let mut frames: Vec<_> =
            frames.into_iter().map(|(year, path)| FrameEntry { year, path }).collect();
        frames.sort_by_key(|f| f.year);
        Self { frames }
    }

    /// Successful frames of a fetch summary; failed years are skipped.
    pub fn from_summary(summary: &FetchSummary) -> Self {
        Self::new(
            summary
                .succeeded()
                .filter_map(|r| r.local_path().map(|p| (r.year(), p.to_path_buf()))),
        )
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[FrameEntry] {
        &self.frames
    }

    pub fn years(&self) -> Vec<i32> {
        self.frames.iter().map(|f| f.year).collect()
    }
}

/// The encoded animation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimatedArtifact {
    pub path: PathBuf,
    pub frame_count: usize,
    pub frame_delay_ms: u32,
    pub loop_forever: bool,
    pub canvas_size: u32,
}

/// Encode `frames` into a GIF at `output`.
///
/// Any frame that fails to decode aborts the whole assembly, so a partially
/// rendered animation is never produced.
pub fn assemble(frames: &FrameSet, config: &AnimationConfig, output: &Path) -> Result<AnimatedArtifact> {
    if frames.is_empty() {
        return Err(Error::NoFramesAvailable { attempted: 0, succeeded: 0 });
    }

    let size = u16::try_from(config.canvas_size)
        .ok()
        .filter(|&size| size > 0)
        .ok_or_else(|| {
            Error::Config(format!("canvas_size must be in 1..={}, got {}", u16::MAX, config.canvas_size))
        })?;

    #[cfg(feature = "parallel")]
    let rendered = {
        use rayon::prelude::*;
        frames
            .frames()
            .par_iter()
            .map(|f| render_frame(&f.path, size, config))
            .collect::<Result<Vec<_>>>()?
    };

    #[cfg(not(feature = "parallel"))]
    let rendered = frames
        .frames()
        .iter()
        .map(|f| render_frame(&f.path, size, config))
        .collect::<Result<Vec<_>>>()?;

    let file = std::fs::File::create(output)?;
    let mut encoder = gif::Encoder::new(BufWriter::new(file), size, size, &[])?;
    if config.loop_forever {
        encoder.set_repeat(gif::Repeat::Infinite)?;
    }

    for frame in &rendered {
        encoder.write_frame(frame)?;
    }

    // writes the trailer
    encoder.into_inner()?.flush()?;

    info!(frames = rendered.len(), path = %output.display(), "GIF created");

    Ok(AnimatedArtifact {
        path: output.to_path_buf(),
        frame_count: rendered.len(),
        frame_delay_ms: config.frame_delay_ms,
        loop_forever: config.loop_forever,
        canvas_size: config.canvas_size,
    })
}

/// Decode one frame and draw it, stretched, onto a freshly cleared canvas.
fn render_frame(path: &Path, size: u16, config: &AnimationConfig) -> Result<gif::Frame<'static>> {
    let decode_err = |source| Error::FrameDecode { path: path.to_path_buf(), source };

    let decoded = ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|err| decode_err(image::ImageError::IoError(err)))?
        .decode()
        .map_err(decode_err)?;

    let edge = u32::from(size);
    let scaled = decoded.resize_exact(edge, edge, FilterType::Triangle).to_rgba8();

    // New canvas per frame: transparent or smaller images must not show the previous year.
    let mut canvas = RgbaImage::from_pixel(edge, edge, Rgba([0, 0, 0, 255]));
    imageops::overlay(&mut canvas, &scaled, 0, 0);

    let mut pixels = canvas.into_raw();
    let speed = config.quality.clamp(1, 30) as i32;
    let mut frame = gif::Frame::from_rgba_speed(size, size, &mut pixels, speed);
    frame.delay = config.delay_centis();

    debug!(path = %path.display(), "rendered frame");
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::fetch::{FailureReason, FetchOutcome, FetchResult};
    use crate::geo::GeoQuery;
    use crate::request::FrameRequest;

    fn write_png(dir: &Path, name: &str, width: u32, height: u32, color: [u8; 4]) -> PathBuf {
        let path = dir.join(name);
        RgbaImage::from_pixel(width, height, Rgba(color)).save(&path).unwrap();
        path
    }

    fn small_config() -> AnimationConfig {
        AnimationConfig { canvas_size: 64, ..AnimationConfig::default() }
    }

    fn decode_frames(path: &Path) -> (gif::Repeat, Vec<(u16, Vec<u8>)>) {
        let mut options = gif::DecodeOptions::new();
        options.set_color_output(gif::ColorOutput::RGBA);
        let mut decoder = options.read_info(std::fs::File::open(path).unwrap()).unwrap();
        let mut frames = Vec::new();
        while let Some(frame) = decoder.read_next_frame().unwrap() {
            frames.push((frame.delay, frame.buffer.to_vec()));
        }
        (decoder.repeat(), frames)
    }

    #[test]
    fn test_assemble_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let red = write_png(dir.path(), "a.png", 32, 16, [255, 0, 0, 255]);
        let green = write_png(dir.path(), "b.png", 100, 100, [0, 255, 0, 255]);
        let blue = write_png(dir.path(), "c.png", 64, 64, [0, 0, 255, 255]);

        // given out of order, FrameSet sorts by year
        let frames = FrameSet::new([(2025, blue), (2023, red), (2024, green)]);
        let out = dir.path().join("out.gif");
        let artifact = assemble(&frames, &small_config(), &out).unwrap();

        assert_eq!(artifact.frame_count, 3);
        assert_eq!(artifact.frame_delay_ms, 800);
        assert!(artifact.loop_forever);

        let (repeat, decoded) = decode_frames(&out);
        assert_eq!(repeat, gif::Repeat::Infinite);
        assert_eq!(decoded.len(), 3);

        let expected = [[255, 0, 0], [0, 255, 0], [0, 0, 255]];
        for ((delay, buffer), want) in decoded.iter().zip(expected) {
            assert_eq!(*delay, 80);
            assert_eq!(buffer.len(), 64 * 64 * 4);
            for c in 0..3 {
                let diff = (buffer[c] as i32 - want[c] as i32).abs();
                assert!(diff < 40, "channel {c} off by {diff}");
            }
        }
    }

    #[test]
    fn test_transparent_frame_is_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let white = write_png(dir.path(), "a.png", 64, 64, [255, 255, 255, 255]);
        let clear = write_png(dir.path(), "b.png", 64, 64, [255, 255, 255, 0]);

        let frames = FrameSet::new([(1, white), (2, clear)]);
        let out = dir.path().join("out.gif");
        assemble(&frames, &small_config(), &out).unwrap();

        let (_, decoded) = decode_frames(&out);
        let second = &decoded[1].1;
        assert!(second[0] < 40 && second[1] < 40 && second[2] < 40);
    }

    #[test]
    fn test_no_loop() {
        let dir = tempfile::tempdir().unwrap();
        let frame = write_png(dir.path(), "a.png", 8, 8, [10, 20, 30, 255]);
        let config = AnimationConfig { loop_forever: false, ..small_config() };
        let out = dir.path().join("out.gif");
        let artifact = assemble(&FrameSet::new([(2020, frame)]), &config, &out).unwrap();

        assert!(!artifact.loop_forever);
        let (repeat, decoded) = decode_frames(&out);
        assert_eq!(repeat, gif::Repeat::Finite(0));
        assert_eq!(decoded.len(), 1);
    }

    #[test]
    fn test_decode_error_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_png(dir.path(), "good.png", 8, 8, [0, 0, 0, 255]);
        let bad = dir.path().join("bad.png");
        std::fs::write(&bad, b"<ServiceExceptionReport/>").unwrap();

        let frames = FrameSet::new([(2023, good), (2024, bad.clone())]);
        let out = dir.path().join("out.gif");
        match assemble(&frames, &small_config(), &out) {
            Err(Error::FrameDecode { path, .. }) => assert_eq!(path, bad),
            other => panic!("expected FrameDecode, got {other:?}"),
        }
        assert!(!out.exists());
    }

    #[test]
    fn test_empty_frame_set() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.gif");
        assert!(matches!(
            assemble(&FrameSet::default(), &small_config(), &out),
            Err(Error::NoFramesAvailable { .. })
        ));
    }

    #[test]
    fn test_canvas_size_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let frame = write_png(dir.path(), "a.png", 8, 8, [10, 20, 30, 255]);
        let frames = FrameSet::new([(2020, frame)]);
        let out = dir.path().join("out.gif");

        for canvas_size in [0, u32::from(u16::MAX) + 1, 70_000] {
            let config = AnimationConfig { canvas_size, ..small_config() };
            assert!(matches!(assemble(&frames, &config, &out), Err(Error::Config(_))));
        }
        assert!(!out.exists());
    }

    #[test]
    fn test_frame_set_from_summary_skips_failures() {
        let bbox = GeoQuery::new(0.0, 0.0, 0.5).unwrap().bounding_box();
        let result = |year: i32, ok: bool| FetchResult {
            request: FrameRequest {
                year,
                bbox,
                url: String::new(),
                destination: PathBuf::from(format!("modis_{year}.png")),
            },
            outcome: if ok {
                FetchOutcome::Success { local_path: PathBuf::from(format!("modis_{year}.png")) }
            } else {
                FetchOutcome::Failed(FailureReason::NonImage {
                    content_type: Some("text/xml".into()),
                    diagnostic: None,
                })
            },
        };

        let summary = FetchSummary::new(vec![
            result(2025, true),
            result(2024, false),
            result(2023, true),
        ]);
        let frames = FrameSet::from_summary(&summary);
        assert_eq!(frames.years(), vec![2023, 2025]);
        assert_eq!(frames.frames()[0].path, PathBuf::from("modis_2023.png"));
    }
}
