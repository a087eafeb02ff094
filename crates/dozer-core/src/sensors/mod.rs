//! Sensor acquisition boundary.
//!
//! The cycle controller only sees [`Acquisition`]. Concrete probes implement
//! [`TemperatureProbe`] / [`SupplyMonitor`] and are combined with
//! [`NodeSensors`]; [`SentinelFilter`] keeps documented error codes away from
//! the hysteresis filters.

use embedded_hal_async::delay::DelayNs;
use log::{debug, warn};
use thiserror_no_std::Error;

/// DS18B20 power-on reset value, returned before a conversion completes.
pub const DS18B20_POWER_ON_RESET: f32 = 85.0;
/// DS18B20 value reported when the probe does not answer on the bus.
pub const DS18B20_DISCONNECTED: f32 = -127.0;
/// Sentinels rejected by default.
pub const DS18B20_SENTINELS: [f32; 2] = [DS18B20_POWER_ON_RESET, DS18B20_DISCONNECTED];

/// Delay between conversion attempts.
pub const SENTINEL_RETRY_DELAY_MS: u32 = 100;
/// Conversion attempts before giving up.
pub const SENTINEL_MAX_ATTEMPTS: u8 = 10;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("Sensor '{sensor}' failed to initialize: {details}")]
    InitializationFailed {
        sensor: &'static str,
        details: &'static str,
    },
    #[error("Sensor '{sensor}' read failed during '{operation}': {details}")]
    ReadFailed {
        sensor: &'static str,
        operation: &'static str,
        details: &'static str,
    },
    #[error("Sensor '{sensor}' produced no valid reading after {attempts} attempts")]
    InvalidReading { sensor: &'static str, attempts: u8 },
}

/// Fresh samples for the cycle controller, already free of sentinel values.
pub trait Acquisition {
    /// Temperature in degrees Celsius.
    fn read_temperature(&mut self) -> impl Future<Output = Result<f32, SensorError>>;

    /// Supply voltage, in the unit the battery offset is configured in.
    fn read_supply_voltage(&mut self) -> impl Future<Output = Result<f32, SensorError>>;
}

/// A single-shot temperature source. May return sentinel codes.
pub trait TemperatureProbe {
    /// Name used in log lines and errors.
    const NAME: &'static str;

    fn sample(&mut self) -> impl Future<Output = Result<f32, SensorError>>;
}

/// A supply-voltage source, usually the internal ADC.
pub trait SupplyMonitor {
    fn sample_supply(&mut self) -> impl Future<Output = Result<f32, SensorError>>;
}

/// Retries a probe until it returns something other than a sentinel.
///
/// The retry is bounded by `max_attempts`, so a dead probe cannot keep the
/// node awake.
pub struct SentinelFilter<P, D> {
    probe: P,
    delay: D,
    sentinels: &'static [f32],
    max_attempts: u8,
    retry_delay_ms: u32,
}

impl<P: TemperatureProbe, D: DelayNs> SentinelFilter<P, D> {
    /// Filter the DS18B20 sentinels with the default retry budget.
    pub fn new(probe: P, delay: D) -> Self {
        Self::with_sentinels(probe, delay, &DS18B20_SENTINELS)
    }

    pub fn with_sentinels(probe: P, delay: D, sentinels: &'static [f32]) -> Self {
        Self {
            probe,
            delay,
            sentinels,
            max_attempts: SENTINEL_MAX_ATTEMPTS,
            retry_delay_ms: SENTINEL_RETRY_DELAY_MS,
        }
    }

    pub fn with_retry(mut self, max_attempts: u8, retry_delay_ms: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    /// Whether `value` is a usable reading.
    pub fn accepts(&self, value: f32) -> bool {
        value.is_finite() && !self.sentinels.contains(&value)
    }

    pub fn into_inner(self) -> P {
        self.probe
    }
}

impl<P: TemperatureProbe, D: DelayNs> TemperatureProbe for SentinelFilter<P, D> {
    const NAME: &'static str = P::NAME;

    async fn sample(&mut self) -> Result<f32, SensorError> {
        for attempt in 1..=self.max_attempts {
            let value = self.probe.sample().await?;
            if self.accepts(value) {
                debug!("{}: {} after {} attempt(s)", P::NAME, value, attempt);
                return Ok(value);
            }

            warn!("{}: discarding invalid reading {}", P::NAME, value);
            if attempt < self.max_attempts {
                self.delay.delay_ms(self.retry_delay_ms).await;
            }
        }

        Err(SensorError::InvalidReading {
            sensor: P::NAME,
            attempts: self.max_attempts,
        })
    }
}

/// The node's sensor set: one temperature probe and one supply monitor.
pub struct NodeSensors<T, V> {
    temperature: T,
    supply: V,
}

impl<T: TemperatureProbe, V: SupplyMonitor> NodeSensors<T, V> {
    pub fn new(temperature: T, supply: V) -> Self {
        Self {
            temperature,
            supply,
        }
    }
}

impl<T: TemperatureProbe, V: SupplyMonitor> Acquisition for NodeSensors<T, V> {
    async fn read_temperature(&mut self) -> Result<f32, SensorError> {
        self.temperature.sample().await
    }

    async fn read_supply_voltage(&mut self) -> Result<f32, SensorError> {
        self.supply.sample_supply().await
    }
}
