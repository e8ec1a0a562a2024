//! PID controller and the plant it drives
//!
//! The simulator's workload: a controller thread closes the loop around a
//! first-order plant each period.

use crate::config::ControllerSection;

/// PID gains
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

/// Positional PID with a clamped output and conditional integration
#[derive(Debug, Clone)]
pub struct Pid {
    gains: PidGains,
    output_limit: f32,
    integral: f32,
    prev_error: Option<f32>,
}

impl Pid {
    pub fn new(gains: PidGains, output_limit: f32) -> Self {
        Self {
            gains,
            output_limit: output_limit.abs(),
            integral: 0.0,
            prev_error: None,
        }
    }

    /// One control step of `dt_s` seconds; returns the clamped output
    pub fn update(&mut self, setpoint: f32, measurement: f32, dt_s: f32) -> f32 {
        let error = setpoint - measurement;
        let derivative = match self.prev_error {
            Some(prev) if dt_s > 0.0 => (error - prev) / dt_s,
            _ => 0.0,
        };
        self.prev_error = Some(error);

        let candidate = self.integral + error * dt_s;
        let unclamped =
            self.gains.kp * error + self.gains.ki * candidate + self.gains.kd * derivative;
        let output = unclamped.clamp(-self.output_limit, self.output_limit);

        // Integrate only while not saturated (anti-windup)
        if output == unclamped {
            self.integral = candidate;
        }
        output
    }
}

/// First-order lag: `tau * dy/dt = gain * u - y`
#[derive(Debug, Clone)]
pub struct FirstOrderPlant {
    gain: f32,
    tau_s: f32,
    value: f32,
}

impl FirstOrderPlant {
    pub fn new(gain: f32, tau_s: f32) -> Self {
        Self {
            gain,
            tau_s,
            value: 0.0,
        }
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn step(&mut self, input: f32, dt_s: f32) -> f32 {
        let alpha = (dt_s / (self.tau_s + dt_s)).clamp(0.0, 1.0);
        self.value += alpha * (self.gain * input - self.value);
        self.value
    }
}

/// Controller and plant stepped together at a fixed period
#[derive(Debug, Clone)]
pub struct ControlLoop {
    pid: Pid,
    plant: FirstOrderPlant,
    dt_s: f32,
    output: f32,
}

impl ControlLoop {
    pub fn new(config: &ControllerSection) -> Self {
        let gains = PidGains {
            kp: config.kp,
            ki: config.ki,
            kd: config.kd,
        };
        Self {
            pid: Pid::new(gains, config.output_limit),
            plant: FirstOrderPlant::new(
                config.plant_gain,
                config.plant_time_constant_ms as f32 / 1000.0,
            ),
            dt_s: config.period_ms as f32 / 1000.0,
            output: 0.0,
        }
    }

    /// Advance one period toward `setpoint`; returns the new measurement
    pub fn step(&mut self, setpoint: f32) -> f32 {
        self.output = self.pid.update(setpoint, self.plant.value(), self.dt_s);
        self.plant.step(self.output, self.dt_s)
    }

    pub fn output(&self) -> f32 {
        self.output
    }
}
