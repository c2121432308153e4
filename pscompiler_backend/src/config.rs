//! Compilation settings.
//!
//! A [`CompileConfig`] is carried by every [`Experiment`](crate::experiment::Experiment) and can be
//! loaded from a TOML table. Every field has a default, so an empty document is a valid
//! configuration:
//!
//! ```
//! use pscompiler_backend::config::*;
//!
//! let cfg = CompileConfig::from_toml_str(r#"
//!     max_ticks = 1000
//!     wait_timing = "triggered"
//! "#).unwrap();
//! assert_eq!(cfg.max_ticks, 1000);
//! assert_eq!(cfg.wait_timing, WaitTiming::Triggered);
//! assert_eq!(cfg.time_base, 1e9);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::*;

/// How tick times after a wait are anchored.
///
/// The resumption of the clock after a wait is caused by an external trigger whose arrival
/// time is not known at compile time. The compiled tick periods are the same under both
/// settings; what changes is the reference point for post-wait times.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitTiming {
    /// Post-wait instruction times are read on the scheduled (nominal) timeline, i.e. as if
    /// the trigger arrived exactly at the wait's scheduled time. Reported `origin_time`s are
    /// absolute experiment times.
    #[default]
    Ideal,
    /// Post-wait times are measured from the trigger arrival: reported `origin_time`s are
    /// relative to the start of their epoch.
    Triggered,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompileConfig {
    /// Number of integer time positions per second. All instruction times are rounded onto
    /// this grid before any tick arithmetic.
    pub time_base: f64,
    /// Upper bound on the number of clock ticks a compilation may produce.
    pub max_ticks: usize,
    pub wait_timing: WaitTiming,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            time_base: 1e9,
            max_ticks: 50_000_000,
            wait_timing: WaitTiming::Ideal,
        }
    }
}

impl CompileConfig {
    /// Parses and validates a configuration from a TOML document.
    pub fn from_toml_str(src: &str) -> Result<Self> {
        let cfg: CompileConfig = toml::from_str(src)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.time_base.is_finite() && self.time_base >= 1.0) {
            return Err(CompileError::Config(format!(
                "time_base must be a finite number of positions per second >= 1, got {}",
                self.time_base
            )));
        }
        if self.time_base.fract() != 0.0 {
            return Err(CompileError::Config(format!(
                "time_base must be integral, got {}",
                self.time_base
            )));
        }
        if self.max_ticks == 0 {
            return Err(CompileError::Config("max_ticks must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::config::*;

    #[test]
    fn empty_document_gives_defaults() {
        let cfg = CompileConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, CompileConfig::default());
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = CompileConfig::from_toml_str("max_tick = 3").unwrap_err();
        assert!(matches!(err, CompileError::Config(_)));
    }

    #[test]
    fn rejects_fractional_time_base() {
        let err = CompileConfig::from_toml_str("time_base = 1.5e0").unwrap_err();
        assert!(matches!(err, CompileError::Config(_)));
    }
}
