//! Simulation configuration.
//!
//! Loaded from TOML, every field optional:
//!
//! ```toml
//! workers = 4
//! start_min = 10
//! start_max = 100
//! clock_delay_ms = 50
//! max_steps = 10000      # 0 disables the step ceiling
//! timeout_ms = 2000      # omit for no wall-clock ceiling
//! seed = 42              # omit for an entropy-seeded run
//! max_concurrency = 2    # omit for one thread per worker
//! trace_dir = "traces"
//!
//! [perturbation]
//! probability = 0.15
//! gates = 100
//! mask_bits = 8
//! allow = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

/// Upper end of the documented perturbation probability range.
pub const RECOMMENDED_MAX_PROBABILITY: f64 = 0.2;

/// Gate settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PerturbationConfig {
    /// Chance that a gate fires after a reduction step.
    pub probability: f64,
    /// Size of the gate index space.
    pub gates: u32,
    /// Width of the gate output mask in bits.
    pub mask_bits: u32,
    /// Whether a non-zero probability is permitted at all.
    pub allow: bool,
}

impl Default for PerturbationConfig {
    fn default() -> Self {
        Self {
            probability: 0.15,
            gates: 100,
            mask_bits: 8,
            allow: true,
        }
    }
}

impl PerturbationConfig {
    /// No gates ever fire.
    pub fn disabled() -> Self {
        Self {
            probability: 0.0,
            ..Self::default()
        }
    }
}

/// Everything a simulation run needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Number of workers.
    pub workers: u32,
    /// Smallest generated start value (inclusive).
    pub start_min: u64,
    /// Largest generated start value (inclusive).
    pub start_max: u64,
    /// Simulated clock cycle slept at the top of every iteration.
    pub clock_delay_ms: u64,
    /// Gate settings.
    pub perturbation: PerturbationConfig,
    /// Per-worker step ceiling; `0` or absent disables it.
    pub max_steps: Option<u64>,
    /// Per-worker wall-clock ceiling in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Master seed. Absent means entropy.
    pub seed: Option<u64>,
    /// Maximum worker threads. Absent means one thread per worker.
    pub max_concurrency: Option<usize>,
    /// Directory for persisted traces.
    pub trace_dir: Option<PathBuf>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            start_min: 10,
            start_max: 100,
            clock_delay_ms: 50,
            perturbation: PerturbationConfig::default(),
            max_steps: Some(10_000),
            timeout_ms: None,
            seed: None,
            max_concurrency: None,
            trace_dir: None,
        }
    }
}

impl SimulationConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown fields.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Parse`] if it is malformed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Checks that the engine can run with these values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(invalid("workers", "at least one worker is required"));
        }
        if self.start_min == 0 {
            return Err(invalid("start_min", "start values must be positive"));
        }
        if self.start_min > self.start_max {
            return Err(invalid(
                "start_max",
                format!("{} is below start_min {}", self.start_max, self.start_min),
            ));
        }
        if self.start_max > i64::MAX as u64 {
            return Err(invalid("start_max", "exceeds the signed 64-bit range"));
        }
        let p = &self.perturbation;
        if !(0.0..=1.0).contains(&p.probability) {
            return Err(invalid(
                "perturbation.probability",
                format!("{} is outside [0, 1]", p.probability),
            ));
        }
        if p.gates == 0 {
            return Err(invalid("perturbation.gates", "gate table cannot be empty"));
        }
        if !(1..=63).contains(&p.mask_bits) {
            return Err(invalid(
                "perturbation.mask_bits",
                format!("{} is outside 1..=63", p.mask_bits),
            ));
        }
        if p.probability > 0.0 && !p.allow {
            return Err(invalid(
                "perturbation.probability",
                "perturbation is disallowed by policy; set probability = 0 or allow = true",
            ));
        }
        if self.max_concurrency == Some(0) {
            return Err(invalid("max_concurrency", "must be at least 1"));
        }
        if p.probability > RECOMMENDED_MAX_PROBABILITY {
            warn!(
                probability = p.probability,
                "perturbation probability above the recommended {RECOMMENDED_MAX_PROBABILITY}"
            );
        }
        Ok(())
    }

    /// Clock cycle as a duration.
    pub fn clock_delay(&self) -> Duration {
        Duration::from_millis(self.clock_delay_ms)
    }

    /// Effective step ceiling.
    pub fn step_ceiling(&self) -> Option<u64> {
        self.max_steps.filter(|&n| n > 0)
    }

    /// Effective wall-clock ceiling.
    pub fn time_ceiling(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Number of worker threads to spawn for `workers` workers.
    pub fn thread_count(&self, workers: usize) -> usize {
        match self.max_concurrency {
            Some(limit) => limit.min(workers).max(1),
            None => workers.max(1),
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = SimulationConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.workers, 4);
        assert_eq!((cfg.start_min, cfg.start_max), (10, 100));
        assert_eq!(cfg.clock_delay(), Duration::from_millis(50));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = SimulationConfig::from_toml_str(
            "workers = 8\n[perturbation]\nprobability = 0.0\n",
        )
        .unwrap();
        assert_eq!(cfg.workers, 8);
        assert_eq!(cfg.perturbation.probability, 0.0);
        assert_eq!(cfg.perturbation.gates, 100);
        assert_eq!(cfg.start_max, 100);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            SimulationConfig::from_toml_str("wrokers = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn invalid_values_name_the_field() {
        let mut cfg = SimulationConfig::default();
        cfg.workers = 0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "workers", .. })
        ));

        let mut cfg = SimulationConfig::default();
        cfg.start_min = 50;
        cfg.start_max = 40;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "start_max", .. })
        ));

        let mut cfg = SimulationConfig::default();
        cfg.perturbation.probability = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn policy_can_reject_perturbation() {
        let mut cfg = SimulationConfig::default();
        cfg.perturbation.allow = false;
        assert!(cfg.validate().is_err());
        cfg.perturbation.probability = 0.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn ceilings() {
        let mut cfg = SimulationConfig::default();
        cfg.max_steps = Some(0);
        assert_eq!(cfg.step_ceiling(), None);
        cfg.timeout_ms = Some(250);
        assert_eq!(cfg.time_ceiling(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn thread_count_is_bounded() {
        let mut cfg = SimulationConfig::default();
        assert_eq!(cfg.thread_count(6), 6);
        cfg.max_concurrency = Some(2);
        assert_eq!(cfg.thread_count(6), 2);
        assert_eq!(cfg.thread_count(1), 1);
    }
}
