//! Host collaborators for the simulated node.

use std::time::Duration as StdDuration;

use dozer_core::power::PowerControl;
use dozer_core::sensors::{DS18B20_POWER_ON_RESET, SensorError, SupplyMonitor, TemperatureProbe};
use dozer_core::transport::{ConnError, Transport};
use embassy_time::Duration;
use embedded_hal_async::delay::DelayNs;
use log::{debug, info, warn};

// ---------------------------------------------------------------------------
// Synthetic sensors
// ---------------------------------------------------------------------------

/// Temperature that drifts slowly with a small fast ripple.
///
/// `elapsed_secs` is simulated time; it advances by the sleep interval on
/// every wake, not by wall-clock time.
pub struct SyntheticProbe {
    elapsed_secs: f64,
    /// Return the DS18B20 power-on value on the first conversion of every
    /// Nth wake.
    glitch_every: Option<u32>,
    wake: u32,
    glitched: bool,
}

impl SyntheticProbe {
    pub fn new(elapsed_secs: f64, wake: u32, glitch_every: Option<u32>) -> Self {
        Self {
            elapsed_secs,
            glitch_every,
            wake,
            glitched: false,
        }
    }

    fn temperature(&self) -> f32 {
        let t = self.elapsed_secs;
        (21.0 + 1.5 * (t / 1800.0).sin() + 0.2 * (t / 97.0).sin()) as f32
    }
}

impl TemperatureProbe for SyntheticProbe {
    const NAME: &'static str = "synthetic-ds18b20";

    async fn sample(&mut self) -> Result<f32, SensorError> {
        let glitch_wake = self
            .glitch_every
            .is_some_and(|n| n > 0 && self.wake % n == 0);

        if glitch_wake && !self.glitched {
            self.glitched = true;
            debug!("Injecting power-on reset reading");
            return Ok(DS18B20_POWER_ON_RESET);
        }

        Ok(self.temperature())
    }
}

/// Supply voltage in millivolts, discharging linearly with a little noise.
pub struct SyntheticSupply {
    elapsed_secs: f64,
}

impl SyntheticSupply {
    pub fn new(elapsed_secs: f64) -> Self {
        Self { elapsed_secs }
    }
}

impl SupplyMonitor for SyntheticSupply {
    async fn sample_supply(&mut self) -> Result<f32, SensorError> {
        let t = self.elapsed_secs;
        Ok((3300.0 - 0.01 * t + 5.0 * (t / 61.0).sin()) as f32)
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Broker that logs what it receives.
///
/// With `drop_every` set, every Nth wake has its link refuse connections so
/// the retry path and the failed-publish policy can be watched.
pub struct LoopbackBroker {
    refusing: bool,
    connected: bool,
    delivered: Vec<(String, String)>,
}

impl LoopbackBroker {
    pub fn new(wake: u32, drop_every: Option<u32>) -> Self {
        let refusing = drop_every.is_some_and(|n| n > 0 && wake % n == 0);
        if refusing {
            warn!("Broker link is down for this wake");
        }

        Self {
            refusing,
            connected: false,
            delivered: Vec::new(),
        }
    }

    pub fn delivered(&self) -> &[(String, String)] {
        &self.delivered
    }
}

impl Transport for LoopbackBroker {
    async fn connect(&mut self) -> Result<(), ConnError> {
        if self.refusing {
            // MQTT CONNACK "server unavailable"
            return Err(ConnError::Refused(3));
        }
        self.connected = true;
        debug!("Broker connected");
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &str) -> Result<(), ConnError> {
        if !self.connected {
            return Err(ConnError::LinkDown);
        }
        info!("PUBLISH {} {}", topic, payload);
        self.delivered.push((topic.to_owned(), payload.to_owned()));
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }
}

// ---------------------------------------------------------------------------
// Time and power
// ---------------------------------------------------------------------------

/// Delays complete immediately; simulated time is advanced by the sleep.
#[derive(Clone, Copy, Default)]
pub struct HostDelay;

impl DelayNs for HostDelay {
    async fn delay_ns(&mut self, _ns: u32) {}
}

/// Records each requested sleep and optionally paces the run in wall-clock
/// time so the log can be followed.
pub struct SimulatedPower {
    pace: Option<StdDuration>,
    slept: Duration,
}

impl SimulatedPower {
    pub fn new(pace_ms: Option<u64>) -> Self {
        Self {
            pace: pace_ms.map(StdDuration::from_millis),
            slept: Duration::from_ticks(0),
        }
    }

    /// Total simulated sleep so far.
    pub fn slept(&self) -> Duration {
        self.slept
    }
}

impl PowerControl for SimulatedPower {
    async fn sleep_for(&mut self, duration: Duration) {
        self.slept += duration;
        if let Some(pace) = self.pace {
            std::thread::sleep(pace);
        }
    }
}
