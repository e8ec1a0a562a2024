//! Runtime configuration types
//!
//! Capacities (thread table size, queue depth) are const generics and fixed
//! at build time. The values here are the ones a board or simulator may
//! want to load from its configuration file.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default idle step for the scheduler in microseconds
pub const DEFAULT_IDLE_STEP_US: u32 = 1000;

/// Per-thread configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ThreadConfig {
    /// Call period in milliseconds (0 = run on every scheduler pass)
    pub period_ms: u32,
    /// Whether the thread is enabled as soon as it is registered
    pub start_enabled: bool,
}

impl ThreadConfig {
    /// Enabled thread called every `period_ms`
    pub const fn periodic(period_ms: u32) -> Self {
        Self {
            period_ms,
            start_enabled: true,
        }
    }

    /// Enabled thread called on every scheduler pass
    pub const fn aperiodic() -> Self {
        Self {
            period_ms: 0,
            start_enabled: true,
        }
    }

    /// Same configuration, but registered disabled
    pub const fn disabled(self) -> Self {
        Self {
            start_enabled: false,
            ..self
        }
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SchedulerConfig {
    /// How long to wait when a pass found nothing due and no idle hook is set
    ///
    /// On hardware this is a short busy-wait; with a simulated clock it is
    /// the step by which simulated time advances.
    pub idle_step_us: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_step_us: DEFAULT_IDLE_STEP_US,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_config_builders() {
        let cfg = ThreadConfig::periodic(20);
        assert_eq!(cfg.period_ms, 20);
        assert!(cfg.start_enabled);

        let cfg = ThreadConfig::aperiodic().disabled();
        assert_eq!(cfg.period_ms, 0);
        assert!(!cfg.start_enabled);
    }

    #[test]
    fn test_default_thread_config_is_disabled_aperiodic() {
        let cfg = ThreadConfig::default();
        assert_eq!(cfg.period_ms, 0);
        assert!(!cfg.start_enabled);
    }
}
