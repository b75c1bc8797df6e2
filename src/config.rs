//! Machine configuration.
//!
//! Everything the front end decides before the machine starts: model,
//! memory size, CPU frequency, boot-time display width, where disk
//! images and dumps live, and what to trace. Serializes to JSON so
//! front ends can persist a setup.
//!
//! ROM images are raw byte blobs loaded by the front end and are not
//! part of the serialized configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::trace;

/// Which machine to simulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Model {
    #[default]
    Abc80,
    Abc802,
}

/// ROM images. A missing image leaves the region as RAM, the way the
/// original machines behave with the ROMs pulled.
#[derive(Debug, Clone, Default)]
pub struct RomSet {
    /// ABC80 BASIC, 80-column variant (16 KiB).
    pub basic80: Option<Vec<u8>>,
    /// ABC80 BASIC, 40-column variant (16 KiB).
    pub basic40: Option<Vec<u8>>,
    /// ABC80 device driver ROMs (16 KiB at 0x4000).
    pub devices: Option<Vec<u8>>,
    /// ABC802 system ROM (32 KiB: BASIC, device drivers, option ROM).
    pub abc802: Option<Vec<u8>>,
}

/// Cassette sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TapeOptions {
    /// Files played in order before memory snooping kicks in.
    pub files: Vec<String>,
    /// Directory searched for filenames the guest asks for.
    pub path: Option<PathBuf>,
}

/// Errors detected at configuration time. Once the CPU runs, nothing
/// here can abort the machine.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid trace category mask {0:#x}")]
    BadTraceMask(u32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineConfig {
    pub model: Model,
    /// ABC80 RAM size in KiB (1-32 or 64); ignored on the ABC802.
    pub kilobytes: u32,
    /// Target CPU frequency; values outside (0.001, 1e6) run unthrottled.
    pub mhz: f64,
    /// Informational: which BASIC generation the ROM images carry.
    pub old_basic: bool,
    /// Boot in 40-column mode.
    pub startup_width40: bool,
    /// Fake short keystrokes; `None` picks by CPU speed the way the
    /// hardware keyboard becomes unusable above ~12.5 MHz.
    pub faketype: Option<bool>,
    /// Directory with disk images named `{mo|mf|sf|hd}{0..7}`.
    pub disk_dir: Option<PathBuf>,
    /// Where Alt-M/Alt-U memory dumps land.
    pub dump_dir: PathBuf,
    /// ABC802 MEM: device preload.
    pub memfile: Option<PathBuf>,
    pub tape: TapeOptions,
    /// Trace category mask (`trace::CPU` and friends).
    pub trace: u32,
    /// Trace sink; `None` with a nonzero mask means stdout.
    pub trace_file: Option<PathBuf>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            model: Model::Abc80,
            kilobytes: 64,
            mhz: 3.0,
            old_basic: false,
            startup_width40: false,
            faketype: None,
            disk_dir: None,
            dump_dir: PathBuf::from("."),
            memfile: None,
            tape: TapeOptions::default(),
            trace: trace::NONE,
            trace_file: None,
        }
    }
}

impl MachineConfig {
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trace & !trace::ALL != 0 {
            return Err(ConfigError::BadTraceMask(self.trace));
        }
        Ok(())
    }

    /// Is the CPU throttled to `mhz`?
    pub fn limit_speed(&self) -> bool {
        self.mhz > 0.001 && self.mhz < 1.0e6
    }

    /// Resolve the fake-typing default: real key edges are hopeless
    /// above ~12.5 MHz.
    pub fn effective_faketype(&self) -> bool {
        self.faketype
            .unwrap_or(!self.limit_speed() || self.mhz > 12.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_the_classic_machine() {
        let config = MachineConfig::default();
        assert_eq!(config.model, Model::Abc80);
        assert_eq!(config.kilobytes, 64);
        assert!((config.mhz - 3.0).abs() < f64::EPSILON);
        assert!(!config.effective_faketype());
    }

    #[test]
    fn test_faketype_follows_speed() {
        let mut config = MachineConfig::default();

        config.mhz = 25.0;
        assert!(config.effective_faketype());

        config.mhz = 0.0; // Unthrottled
        assert!(config.effective_faketype());

        config.mhz = 3.0;
        config.faketype = Some(true);
        assert!(config.effective_faketype());
    }

    #[test]
    fn test_bad_trace_mask_rejected() {
        let config = MachineConfig {
            trace: 0x100,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BadTraceMask(0x100))
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let config = MachineConfig {
            model: Model::Abc802,
            mhz: 0.0,
            tape: TapeOptions {
                files: vec!["demo.bas".into()],
                path: Some(PathBuf::from("tapes")),
            },
            ..Default::default()
        };

        let json = serde_json::to_string(&config).unwrap();
        let back: MachineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.model, Model::Abc802);
        assert_eq!(back.tape.files, vec!["demo.bas".to_string()]);
    }
}
