//! Configuration System using Figment
//!
//! Settings are loaded from:
//! 1. Built-in defaults
//! 2. A TOML file (`config/beamscan.toml` unless told otherwise)
//! 3. Environment variables prefixed with `BEAMSCAN_`
//!
//! Later sources win. Nested keys are separated by a double underscore:
//!
//! ```text
//! BEAMSCAN_APPLICATION__LOG_LEVEL=debug
//! BEAMSCAN_SCAN__DWELL_TIME=500ms
//! BEAMSCAN_STORAGE__OUTPUT_DIR=/data/beam
//! ```
//!
//! # Example
//!
//! ```no_run
//! use beamscan::config::Settings;
//!
//! let settings = Settings::load()?;
//! println!("Log level: {}", settings.application.log_level);
//! println!("Dwell: {:?}", settings.scan.dwell_time);
//! # Ok::<(), beamscan::error::ScanError>(())
//! ```

use crate::core::{FilterKind, Position};
use crate::data::storage::SinkFormat;
use crate::error::{ScanError, ScanResult};
use crate::hardware::mock::BeamProfile;
use crate::scan::executor::ScanParameters;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default settings file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/beamscan.toml";

/// Top-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationConfig,
    /// Per-point timing and acquisition
    pub scan: ScanConfig,
    /// Artifact output
    pub storage: StorageConfig,
    /// Scan pattern and origin
    pub pattern: PatternConfig,
    /// Simulated stage and DAQ
    pub mock: MockConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "beamscan".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Per-point scan timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Wait at each point before reading
    #[serde(with = "humantime_serde")]
    pub dwell_time: Duration,
    /// Extra wait after the first move of a scan
    #[serde(with = "humantime_serde")]
    pub first_move_settle: Duration,
    /// DAQ analog input channel
    pub channel: u32,
    /// Sampling window per reading
    #[serde(with = "humantime_serde")]
    pub acquisition_window: Duration,
    /// Reduction of the window's samples
    pub filter: FilterKind,
    /// Assumed move time per point, for duration estimates only
    #[serde(with = "humantime_serde")]
    pub movement_time_estimate: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let params = ScanParameters::default();
        Self {
            dwell_time: params.dwell_time,
            first_move_settle: params.first_move_settle,
            channel: params.channel,
            acquisition_window: params.acquisition_window,
            filter: params.filter,
            movement_time_estimate: Duration::from_secs(1),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Output directory for artifacts
    pub output_dir: PathBuf,
    /// Artifact file name prefix; a timestamp is appended per session
    pub file_prefix: String,
    /// Sinks to write
    pub formats: Vec<SinkFormat>,
    /// Observer channel depth before events are dropped
    pub observer_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
            file_prefix: "scan".to_string(),
            formats: vec![SinkFormat::Csv, SinkFormat::Tdms],
            observer_capacity: 64,
        }
    }
}

/// Pattern shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternShape {
    /// Serpentine raster of `width` x `height`
    Rectangle,
    /// Filled disc of `radius`
    Circle,
}

/// Scan pattern configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Which generator to use
    pub shape: PatternShape,
    /// Centre of the pattern in stage coordinates (mm)
    pub origin: Position,
    /// Rectangle width (mm)
    pub width: f64,
    /// Rectangle height (mm)
    pub height: f64,
    /// Circle radius (mm)
    pub radius: f64,
    /// Column spacing (mm)
    pub step_x: f64,
    /// Row spacing (mm)
    pub step_y: f64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            shape: PatternShape::Rectangle,
            origin: Position::new(0.0, 0.0),
            width: 20.0,
            height: 15.0,
            radius: 10.0,
            step_x: 2.0,
            step_y: 2.0,
        }
    }
}

/// Simulated hardware configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    /// Stage speed (mm/s)
    pub speed_mm_per_sec: f64,
    /// DAQ sample rate (Hz)
    pub sample_rate_hz: f64,
    /// Uniform noise half width (V)
    pub noise_volts: f64,
    /// Beam centre; the pattern origin when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beam_center: Option<Position>,
    /// Beam sigma (mm)
    pub beam_sigma_mm: f64,
    /// Beam peak above offset (V)
    pub peak_volts: f64,
    /// Background (V)
    pub offset_volts: f64,
}

impl Default for MockConfig {
    fn default() -> Self {
        let beam = BeamProfile::default();
        Self {
            speed_mm_per_sec: 50.0,
            sample_rate_hz: 1000.0,
            noise_volts: 0.005,
            beam_center: None,
            beam_sigma_mm: beam.sigma_mm,
            peak_volts: beam.peak_volts,
            offset_volts: beam.offset_volts,
        }
    }
}

impl MockConfig {
    /// Beam profile for a [`crate::hardware::mock::MockDaq`], centred on
    /// `origin` unless a centre is configured.
    pub fn beam_profile(&self, origin: Position) -> BeamProfile {
        BeamProfile {
            center: self.beam_center.unwrap_or(origin),
            sigma_mm: self.beam_sigma_mm,
            peak_volts: self.peak_volts,
            offset_volts: self.offset_volts,
        }
    }
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Settings {
    /// Load settings from `config/beamscan.toml` and environment variables
    ///
    /// A missing file is not an error; defaults and the environment still apply.
    ///
    /// # Errors
    ///
    /// Returns a ScanError if a source cannot be parsed or validation fails.
    pub fn load() -> ScanResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load settings from a specific file path
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the TOML file (relative or absolute)
    pub fn load_from<P: AsRef<Path>>(path: P) -> ScanResult<Self> {
        Self::from_figment(Self::figment(path))
    }

    /// Provider stack: defaults, then `path`, then `BEAMSCAN_*` variables.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("BEAMSCAN_").split("__"))
    }

    /// Extract and validate settings from any figment.
    pub fn from_figment(figment: Figment) -> ScanResult<Self> {
        let settings: Self = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Pattern steps and extents are positive
    /// - At least one sink format is configured
    /// - Acquisition window is non-zero
    pub fn validate(&self) -> ScanResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ScanError::InvalidParameter(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let pattern = &self.pattern;
        if !(pattern.step_x > 0.0 && pattern.step_y > 0.0) {
            return Err(ScanError::InvalidParameter(format!(
                "Invalid step size ({}, {}). Steps must be positive",
                pattern.step_x, pattern.step_y
            )));
        }
        let extent_ok = match pattern.shape {
            PatternShape::Rectangle => pattern.width > 0.0 && pattern.height > 0.0,
            PatternShape::Circle => pattern.radius > 0.0,
        };
        if !extent_ok {
            return Err(ScanError::InvalidParameter(format!(
                "Invalid {:?} extent. Dimensions must be positive",
                pattern.shape
            )));
        }

        if self.storage.formats.is_empty() {
            return Err(ScanError::InvalidParameter(
                "storage.formats must name at least one of: csv, tdms".to_string(),
            ));
        }

        self.scan_parameters().validate()
    }

    /// Scan parameters for the executor.
    pub fn scan_parameters(&self) -> ScanParameters {
        ScanParameters {
            dwell_time: self.scan.dwell_time,
            first_move_settle: self.scan.first_move_settle,
            channel: self.scan.channel,
            acquisition_window: self.scan.acquisition_window,
            filter: self.scan.filter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.scan.dwell_time, Duration::from_secs(1));
        assert_eq!(settings.scan.first_move_settle, Duration::from_secs(2));
        assert_eq!(settings.scan.acquisition_window, Duration::from_millis(100));
        assert_eq!(settings.scan.filter, FilterKind::Mean);
        assert_eq!(settings.storage.output_dir, PathBuf::from("data"));
        assert_eq!(settings.storage.observer_capacity, 64);
        assert_eq!(
            settings.storage.formats,
            vec![SinkFormat::Csv, SinkFormat::Tdms]
        );
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[application]
log_level = "debug"

[scan]
dwell_time = "250ms"
filter = "std_filtered"

[storage]
formats = ["csv"]

[pattern]
shape = "circle"
radius = 5.0
origin = {{ x = 904.0, y = 620.0 }}
"#
        )
        .unwrap();

        let settings = Settings::from_figment(
            Figment::from(Serialized::defaults(Settings::default()))
                .merge(Toml::file(file.path())),
        )
        .unwrap();

        assert_eq!(settings.application.log_level, "debug");
        assert_eq!(settings.scan.dwell_time, Duration::from_millis(250));
        assert_eq!(settings.scan.first_move_settle, Duration::from_secs(2));
        assert_eq!(settings.scan.filter, FilterKind::StdFiltered);
        assert_eq!(settings.storage.formats, vec![SinkFormat::Csv]);
        assert_eq!(settings.pattern.shape, PatternShape::Circle);
        assert_eq!(settings.pattern.origin, Position::new(904.0, 620.0));
        // untouched keys keep their defaults
        assert_eq!(settings.pattern.step_x, 2.0);
        assert_eq!(
            settings.mock.beam_profile(settings.pattern.origin).center,
            Position::new(904.0, 620.0)
        );
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::from_figment(
            Figment::from(Serialized::defaults(Settings::default()))
                .merge(Toml::file(dir.path().join("absent.toml"))),
        )
        .unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut settings = Settings::default();
        settings.application.log_level = "verbose".to_string();
        let result = settings.validate();
        assert!(result.unwrap_err().to_string().contains("Invalid log_level"));
    }

    #[test]
    fn test_invalid_steps_and_extent() {
        let mut settings = Settings::default();
        settings.pattern.step_y = 0.0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.pattern.shape = PatternShape::Circle;
        settings.pattern.radius = -1.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_window_and_empty_formats_rejected() {
        let mut settings = Settings::default();
        settings.scan.acquisition_window = Duration::ZERO;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.storage.formats.clear();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_unknown_format_is_a_load_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[storage]\nformats = [\"hdf5\"]").unwrap();
        let result = Settings::from_figment(
            Figment::from(Serialized::defaults(Settings::default()))
                .merge(Toml::file(file.path())),
        );
        assert!(matches!(result, Err(ScanError::Config(_))));
    }
}
