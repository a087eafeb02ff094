//! Node configuration.
//!
//! Defaults are fixed at build time: strings come from `.env` through
//! `build.rs`, numbers are constants below. A provisioned node may instead
//! carry a postcard-encoded [`NodeConfig`] blob, which borrows its strings
//! straight from the blob without allocating.

use embassy_time::Duration;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::transport::{RetryPolicy, Topics};

macro_rules! baked_or {
    ($key:literal, $default:expr) => {
        match option_env!($key) {
            Some(value) => value,
            None => $default,
        }
    };
}

pub const WIFI_SSID: &str = baked_or!("DOZER_WIFI_SSID", "");
pub const WIFI_PASSWORD: &str = baked_or!("DOZER_WIFI_PASSWORD", "");
pub const MQTT_HOST: &str = baked_or!("DOZER_MQTT_HOST", "127.0.0.1");
pub const MQTT_USERNAME: &str = baked_or!("DOZER_MQTT_USERNAME", "");
pub const MQTT_PASSWORD: &str = baked_or!("DOZER_MQTT_PASSWORD", "");

pub const MQTT_PORT: u16 = 1883;
pub const MQTT_CLIENT_ID: &str = "dozer-node";
pub const TOPIC_TEMPERATURE: &str = "/sensors/test/temperature";
pub const TOPIC_BATTERY: &str = "/sensors/test/battery";

pub const SLEEP_SECS: u32 = 30;
/// Minimum temperature change worth publishing, in °C.
pub const TEMPERATURE_OFFSET: f32 = 0.5;
/// Minimum supply voltage change worth publishing, in mV.
pub const BATTERY_OFFSET: f32 = 50.0;
/// Publish at least once every this many wake cycles.
pub const MAX_WAKE_COUNT: i32 = 10;

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ConfigError {
    #[error("hysteresis offset for {metric} must be finite and non-negative, got {value}")]
    InvalidOffset { metric: &'static str, value: f32 },
    #[error("max wake count must be at least 1, got {0}")]
    InvalidWakeCount(i32),
    #[error("topic for {0} is empty")]
    EmptyTopic(&'static str),
    #[error("config blob could not be encoded or decoded")]
    Encoding,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(bound(deserialize = "'de: 'a"))]
pub struct NodeConfig<'a> {
    pub network: NetworkConfig<'a>,
    pub broker: BrokerConfig<'a>,
    pub cycle: CycleConfig,
    pub retry: RetryPolicy,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConfig<'a> {
    pub ssid: &'a str,
    pub password: &'a str,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig<'a> {
    pub host: &'a str,
    pub port: u16,
    pub client_id: &'a str,
    /// Empty when the broker accepts anonymous clients.
    pub username: &'a str,
    pub password: &'a str,
    pub topic_temperature: &'a str,
    pub topic_battery: &'a str,
}

impl<'a> BrokerConfig<'a> {
    pub fn credentials(&self) -> Option<(&'a str, &'a str)> {
        if self.username.is_empty() {
            None
        } else {
            Some((self.username, self.password))
        }
    }

    pub fn topics(&self) -> Topics<'a> {
        Topics {
            temperature: self.topic_temperature,
            battery: self.topic_battery,
        }
    }
}

/// What to do with the new values when a publish attempt did not deliver.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailedPublishPolicy {
    /// Commit the new values and reset the counter anyway, as if delivered.
    #[default]
    CommitAnyway,
    /// Keep the previous values and the counter so the next wake retries.
    RetainPrevious,
}

/// Publish-decision tuning.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct CycleConfig {
    pub temperature_offset: f32,
    pub battery_offset: f32,
    /// Forced publish once the wake counter reaches this value.
    pub max_wake_count: i32,
    pub sleep_secs: u32,
    pub failed_publish: FailedPublishPolicy,
}

impl CycleConfig {
    pub const DEFAULT: Self = Self {
        temperature_offset: TEMPERATURE_OFFSET,
        battery_offset: BATTERY_OFFSET,
        max_wake_count: MAX_WAKE_COUNT,
        sleep_secs: SLEEP_SECS,
        failed_publish: FailedPublishPolicy::CommitAnyway,
    };

    pub fn sleep_interval(&self) -> Duration {
        Duration::from_secs(self.sleep_secs as u64)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (metric, value) in [
            ("temperature", self.temperature_offset),
            ("battery", self.battery_offset),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidOffset { metric, value });
            }
        }
        if self.max_wake_count < 1 {
            return Err(ConfigError::InvalidWakeCount(self.max_wake_count));
        }
        Ok(())
    }
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl NodeConfig<'static> {
    /// The configuration baked into this build.
    pub const fn compiled() -> Self {
        Self {
            network: NetworkConfig {
                ssid: WIFI_SSID,
                password: WIFI_PASSWORD,
            },
            broker: BrokerConfig {
                host: MQTT_HOST,
                port: MQTT_PORT,
                client_id: MQTT_CLIENT_ID,
                username: MQTT_USERNAME,
                password: MQTT_PASSWORD,
                topic_temperature: TOPIC_TEMPERATURE,
                topic_battery: TOPIC_BATTERY,
            },
            cycle: CycleConfig::DEFAULT,
            retry: RetryPolicy::DEFAULT,
        }
    }
}

impl Default for NodeConfig<'static> {
    fn default() -> Self {
        Self::compiled()
    }
}

impl<'a> NodeConfig<'a> {
    /// Decode a provisioning blob. Strings borrow from `bytes`.
    pub fn from_postcard(bytes: &'a [u8]) -> Result<Self, ConfigError> {
        let config: Self = postcard::from_bytes(bytes).map_err(|e| {
            log::error!("Config blob decode failed: {:?}", e);
            ConfigError::Encoding
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Encode into `buf`, returning the used prefix.
    pub fn to_postcard<'b>(&self, buf: &'b mut [u8]) -> Result<&'b mut [u8], ConfigError> {
        postcard::to_slice(self, buf).map_err(|e| {
            log::error!("Config blob encode failed: {:?}", e);
            ConfigError::Encoding
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cycle.validate()?;
        if self.broker.topic_temperature.is_empty() {
            return Err(ConfigError::EmptyTopic("temperature"));
        }
        if self.broker.topic_battery.is_empty() {
            return Err(ConfigError::EmptyTopic("battery"));
        }
        Ok(())
    }
}
