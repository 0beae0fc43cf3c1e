//! Engine configuration.
//!
//! Values are read from environment variables with sensible defaults so
//! the binary can run without any configuration at all.  Organisation
//! settings that live in the settings store (grace overrides) are
//! resolved once per run into a [`GraceOverrides`] and passed down to
//! every calculator explicitly.

use crate::error::{AttendanceError, AttendanceResult};
use crate::models::GlobalSettings;
use std::path::PathBuf;

/// Default organisation offset: +05:30.
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 330;
pub const DEFAULT_TOLERANCE_MINUTES: f64 = 180.0;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Offset of the organisation's wall clock from UTC.
    pub utc_offset_minutes: i32,
    /// How far an in-time may sit from a shift start and still match it.
    pub tolerance_minutes: f64,
    /// When set, early-out grace falls back to the shift's own grace
    /// period before the 15 minute default, mirroring late-in.
    pub early_out_uses_shift_grace: bool,
    pub data_dir: PathBuf,
    pub bind_addr: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: DEFAULT_UTC_OFFSET_MINUTES,
            tolerance_minutes: DEFAULT_TOLERANCE_MINUTES,
            early_out_uses_shift_grace: false,
            data_dir: PathBuf::from("data"),
            bind_addr: "127.0.0.1:3000".to_string(),
        }
    }
}

impl EngineConfig {
    /// Builds the configuration from `ATTENDANCE_*` environment variables.
    pub fn from_env() -> AttendanceResult<Self> {
        let defaults = Self::default();
        let utc_offset_minutes = match std::env::var("ATTENDANCE_UTC_OFFSET_MINUTES") {
            Ok(raw) => raw.trim().parse::<i32>().map_err(|_| {
                AttendanceError::Config(format!("ATTENDANCE_UTC_OFFSET_MINUTES={raw}"))
            })?,
            Err(_) => defaults.utc_offset_minutes,
        };
        let tolerance_minutes = match std::env::var("ATTENDANCE_TOLERANCE_MINUTES") {
            Ok(raw) => raw.trim().parse::<f64>().map_err(|_| {
                AttendanceError::Config(format!("ATTENDANCE_TOLERANCE_MINUTES={raw}"))
            })?,
            Err(_) => defaults.tolerance_minutes,
        };
        let early_out_uses_shift_grace = std::env::var("ATTENDANCE_EARLY_OUT_USES_SHIFT_GRACE")
            .map(|raw| matches!(raw.trim(), "1" | "true" | "yes"))
            .unwrap_or(defaults.early_out_uses_shift_grace);
        let data_dir = std::env::var("ATTENDANCE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let bind_addr = std::env::var("ATTENDANCE_BIND_ADDR").unwrap_or(defaults.bind_addr);

        if tolerance_minutes < 0.0 {
            return Err(AttendanceError::Config(
                "tolerance must not be negative".to_string(),
            ));
        }

        Ok(Self {
            utc_offset_minutes,
            tolerance_minutes,
            early_out_uses_shift_grace,
            data_dir,
            bind_addr,
        })
    }
}

/// Grace overrides resolved from [`GlobalSettings`] for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GraceOverrides {
    pub late_in: Option<f64>,
    pub early_out: Option<f64>,
    pub early_out_uses_shift_grace: bool,
}

impl GraceOverrides {
    pub fn resolve(settings: &GlobalSettings, config: &EngineConfig) -> Self {
        Self {
            late_in: settings.late_in_grace_minutes,
            early_out: settings.early_out_grace_minutes,
            early_out_uses_shift_grace: config.early_out_uses_shift_grace,
        }
    }
}
