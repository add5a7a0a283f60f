//! Pipeline configuration.
//!
//! Every field has a default, so a YAML file only needs to name what it changes:
//!
//! ```yaml
//! half_width_degrees: 0.25
//! default_years: [2023, 2024, 2025]
//! animation:
//!   frame_delay_ms: 500
//! fetch:
//!   concurrency: 2
//!   retries: 1
//! ```

use std::path::PathBuf;

use serde::Deserialize;

use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub imagery: ImageryConfig,
    /// Degrees added on each side of the query point
    pub half_width_degrees: f64,
    /// Years used when a request names none
    pub default_years: Vec<i32>,
    pub animation: AnimationConfig,
    pub fetch: FetchConfig,
    pub transcode: TranscodeConfig,
    /// Root of the `frames/` and `output/` working directories
    pub work_dir: PathBuf,
    /// Leave run directories on disk after delivery or failure
    pub keep_artifacts: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            imagery: ImageryConfig::default(),
            half_width_degrees: 0.5,
            default_years: vec![2025],
            animation: AnimationConfig::default(),
            fetch: FetchConfig::default(),
            transcode: TranscodeConfig::default(),
            work_dir: PathBuf::from("."),
            keep_artifacts: false,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.half_width_degrees.is_finite() && self.half_width_degrees > 0.0) {
            return Err(Error::Config(format!(
                "half_width_degrees must be positive, got {}",
                self.half_width_degrees
            )));
        }
        if self.default_years.is_empty() {
            return Err(Error::Config("default_years must not be empty".into()));
        }
        if self.imagery.width == 0 || self.imagery.height == 0 {
            return Err(Error::Config("imagery width and height must be non-zero".into()));
        }
        if self.animation.canvas_size == 0 || self.animation.canvas_size > u16::MAX as u32 {
            return Err(Error::Config(format!(
                "canvas_size must be in 1..={}, got {}",
                u16::MAX,
                self.animation.canvas_size
            )));
        }
        if !(1..=30).contains(&self.animation.quality) {
            return Err(Error::Config(format!(
                "quality must be in 1..=30, got {}",
                self.animation.quality
            )));
        }
        if self.fetch.concurrency == 0 {
            return Err(Error::Config("fetch concurrency must be at least 1".into()));
        }
        if self.fetch.min_frames == 0 {
            return Err(Error::Config("min_frames must be at least 1".into()));
        }
        let name = std::path::Path::new(&self.transcode.output_name);
        if name.file_name().map(|n| n != name.as_os_str()).unwrap_or(true) {
            return Err(Error::Config(format!(
                "output_name must be a plain file name, got {:?}",
                self.transcode.output_name
            )));
        }
        Ok(())
    }
}

/// WMS GetMap parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageryConfig {
    pub base_url: String,
    pub version: String,
    pub layer: String,
    pub style: String,
    pub format: String,
    pub transparent: bool,
    pub crs: String,
    pub width: u32,
    pub height: u32,
}

impl Default for ImageryConfig {
    fn default() -> Self {
        Self {
            base_url: "https://gibs.earthdata.nasa.gov/wms/epsg4326/best/wms.cgi".into(),
            version: "1.3.0".into(),
            layer: "MODIS_Terra_CorrectedReflectance_TrueColor".into(),
            style: String::new(),
            format: "image/png".into(),
            transparent: false,
            crs: "EPSG:4326".into(),
            width: 512,
            height: 512,
        }
    }
}

/// Animation timing and encoding options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    /// Square canvas edge in pixels
    pub canvas_size: u32,
    pub frame_delay_ms: u32,
    pub loop_forever: bool,
    /// NeuQuant sampling factor (1 = best, 30 = fastest)
    pub quality: u32,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self { canvas_size: 512, frame_delay_ms: 800, loop_forever: true, quality: 10 }
    }
}

impl AnimationConfig {
    /// Frame delay in GIF units (hundredths of a second), at least 1.
    pub fn delay_centis(&self) -> u16 {
        (self.frame_delay_ms / 10).clamp(1, u16::MAX as u32) as u16
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Maximum in-flight requests (1 = sequential)
    pub concurrency: usize,
    pub timeout_secs: u64,
    /// Extra attempts for frames that failed at the transport level
    pub retries: u32,
    /// Fewer successful frames than this aborts the run
    pub min_frames: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { concurrency: 4, timeout_secs: 60, retries: 0, min_frames: 1 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    pub program: PathBuf,
    /// File name of the delivered video
    pub output_name: String,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self { program: PathBuf::from("ffmpeg"), output_name: "forest_loss.mp4".into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.animation.delay_centis(), 80);
        assert_eq!(config.default_years, vec![2025]);
    }

    #[test]
    fn test_invalid_values() {
        let mut config = PipelineConfig::default();
        config.animation.quality = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.fetch.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.half_width_degrees = -0.5;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.transcode.output_name = "../escape.mp4".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_delay_rounding() {
        let mut animation = AnimationConfig::default();
        animation.frame_delay_ms = 5;
        assert_eq!(animation.delay_centis(), 1);
        animation.frame_delay_ms = 1250;
        assert_eq!(animation.delay_centis(), 125);
    }
}
