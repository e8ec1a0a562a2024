//! Simulator configuration
//!
//! Loaded from TOML. Every section and key has a default, so a file only
//! needs the values it changes. The embedded `sim.toml` is used when no
//! path is given.

use std::fmt;
use std::path::Path;

use kestrel_core::{SchedulerConfig, ThreadConfig};
use kestrel_protocol::PacketConfig;
use log::LevelFilter;
use serde::Deserialize;

/// Embedded default configuration
pub const EMBEDDED_CONFIG: &str = include_str!("../sim.toml");

/// Which execution model runs the threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    /// Single-threaded scheduler on a simulated clock
    #[default]
    Cooperative,
    /// One native thread per thread, real time
    Os,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub model: Model,
    /// How long to run, in clock milliseconds
    pub duration_ms: u32,
    pub idle_step_us: u32,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            model: Model::Cooperative,
            duration_ms: 10_000,
            idle_step_us: SchedulerConfig::default().idle_step_us,
        }
    }
}

impl SchedulerSection {
    pub fn core(&self) -> SchedulerConfig {
        SchedulerConfig {
            idle_step_us: self.idle_step_us,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LinkSection {
    pub capacity: usize,
    pub poll_period_ms: u32,
    pub peer_period_ms: u32,
    pub packet: PacketConfig,
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            capacity: 4096,
            poll_period_ms: 1,
            peer_period_ms: 10,
            packet: PacketConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ControllerSection {
    pub period_ms: u32,
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    pub output_limit: f32,
    pub setpoints: Vec<f32>,
    pub setpoint_hold_ms: u32,
    pub plant_gain: f32,
    pub plant_time_constant_ms: u32,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            period_ms: 20,
            kp: 2.0,
            ki: 0.8,
            kd: 0.05,
            output_limit: 100.0,
            setpoints: vec![20.0, 60.0, 40.0],
            setpoint_hold_ms: 3000,
            plant_gain: 1.0,
            plant_time_constant_ms: 800,
        }
    }
}

impl ControllerSection {
    /// Setpoint in force before the host sends anything
    pub fn initial_setpoint(&self) -> f32 {
        self.setpoints.first().copied().unwrap_or(0.0)
    }

    pub fn thread(&self) -> ThreadConfig {
        ThreadConfig::periodic(self.period_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TelemetrySection {
    pub enabled: bool,
    pub period_ms: u32,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            enabled: true,
            period_ms: 100,
        }
    }
}

impl TelemetrySection {
    pub fn thread(&self) -> ThreadConfig {
        ThreadConfig {
            period_ms: self.period_ms,
            start_enabled: self.enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

/// Complete simulator configuration
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub scheduler: SchedulerSection,
    pub link: LinkSection,
    pub controller: ControllerSection,
    pub telemetry: TelemetrySection,
    pub log: LogSection,
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    /// Config file could not be read
    Io(std::io::Error),
    /// TOML syntax or type error
    Parse(toml::de::Error),
    /// Parsed, but a value is unusable
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "cannot read config: {e}"),
            Self::Parse(e) => write!(f, "invalid config: {e}"),
            Self::Invalid(what) => write!(f, "invalid config: {what}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Parse(e)
    }
}

impl SimConfig {
    /// Parse and validate a TOML document
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, or the embedded default when `None`
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::parse(&std::fs::read_to_string(path)?),
            None => Self::parse(EMBEDDED_CONFIG),
        }
    }

    pub fn log_level(&self) -> Result<LevelFilter, ConfigError> {
        self.log
            .level
            .parse()
            .map_err(|_| ConfigError::Invalid("log.level is not a log level"))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        // Periodic threads keep the simulated clock moving; a zero period
        // would be due on every pass and starve the idle step.
        if self.controller.period_ms == 0 {
            return Err(ConfigError::Invalid("controller.period_ms must be positive"));
        }
        if self.link.poll_period_ms == 0 || self.link.peer_period_ms == 0 {
            return Err(ConfigError::Invalid("link periods must be positive"));
        }
        if self.telemetry.period_ms == 0 {
            return Err(ConfigError::Invalid("telemetry.period_ms must be positive"));
        }
        if self.scheduler.duration_ms == 0 {
            return Err(ConfigError::Invalid("scheduler.duration_ms must be positive"));
        }
        if self.scheduler.idle_step_us == 0 {
            return Err(ConfigError::Invalid("scheduler.idle_step_us must be positive"));
        }
        if self.controller.plant_time_constant_ms == 0 {
            return Err(ConfigError::Invalid("controller.plant_time_constant_ms must be positive"));
        }
        if self.link.capacity == 0 {
            return Err(ConfigError::Invalid("link.capacity must be positive"));
        }
        let c = &self.controller;
        let gains = [c.kp, c.ki, c.kd, c.output_limit, c.plant_gain];
        if !gains.iter().all(|v| v.is_finite()) {
            return Err(ConfigError::Invalid("controller gains and limits must be finite"));
        }
        if !c.setpoints.iter().all(|v| v.is_finite()) {
            return Err(ConfigError::Invalid("controller.setpoints must be finite"));
        }
        self.log_level()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_config_parses() {
        let config = SimConfig::load(None).unwrap();
        assert_eq!(config.scheduler.model, Model::Cooperative);
        assert_eq!(config.controller.setpoints, vec![20.0, 60.0, 40.0]);
        assert_eq!(config.link.packet.max_payload, 256);
        assert_eq!(config.link.packet.initial_sequence, 0);
        assert_eq!(config.log_level().unwrap(), LevelFilter::Info);
    }

    #[test]
    fn test_missing_keys_take_defaults() {
        let config = SimConfig::parse("[scheduler]\nmodel = \"os\"\nduration_ms = 500\n").unwrap();
        assert_eq!(config.scheduler.model, Model::Os);
        assert_eq!(config.scheduler.duration_ms, 500);
        assert_eq!(config.controller, ControllerSection::default());
        assert!(config.telemetry.enabled);
    }

    #[test]
    fn test_packet_section_nested_under_link() {
        let config = SimConfig::parse("[link.packet]\ninitial_sequence = 250\n").unwrap();
        assert_eq!(config.link.packet.initial_sequence, 250);
        assert_eq!(config.link.packet.max_payload, PacketConfig::default().max_payload);
    }

    #[test]
    fn test_zero_period_rejected() {
        let err = SimConfig::parse("[controller]\nperiod_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_bad_log_level_rejected() {
        let err = SimConfig::parse("[log]\nlevel = \"loud\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_non_finite_controller_values_rejected() {
        for text in [
            "[controller]\noutput_limit = nan\n",
            "[controller]\nkp = inf\n",
            "[controller]\nsetpoints = [10.0, -inf]\n",
        ] {
            let err = SimConfig::parse(text).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{text}");
        }
    }

    #[test]
    fn test_unknown_model_is_parse_error() {
        let err = SimConfig::parse("[scheduler]\nmodel = \"threads\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_disabled_telemetry_thread() {
        let config = SimConfig::parse("[telemetry]\nenabled = false\n").unwrap();
        assert!(!config.telemetry.thread().start_enabled);
    }
}
