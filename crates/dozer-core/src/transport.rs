//! Publish transport boundary.
//!
//! The link (Wi-Fi association plus broker session) is an external
//! collaborator behind [`Transport`]. This module adds what the core needs on
//! top of it: a connect loop with a hard attempt limit and a per-attempt
//! timeout, payload formatting, and a [`PublishOutcome`] the controller can
//! act on.

use core::fmt::Write;

use embassy_futures::select::{Either, select};
use embedded_hal_async::delay::DelayNs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

/// Capacity of a formatted reading. Fits any finite `f32` with two decimals.
pub const PAYLOAD_CAPACITY: usize = 48;

pub type Payload = heapless::String<PAYLOAD_CAPACITY>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnError {
    #[error("network link unavailable")]
    LinkDown,
    #[error("broker refused the connection (rc={0})")]
    Refused(i8),
    #[error("connect attempt timed out")]
    Timeout,
    #[error("publish was not accepted by the broker")]
    PublishFailed,
    #[error("payload does not fit the publish buffer")]
    PayloadTooLarge,
}

/// Link to the broker. Implementations own radio and session management.
pub trait Transport {
    /// Bring the link and broker session up. One attempt per call.
    fn connect(&mut self) -> impl Future<Output = Result<(), ConnError>>;

    fn publish(
        &mut self,
        topic: &str,
        payload: &str,
    ) -> impl Future<Output = Result<(), ConnError>>;

    /// Tear the session and link down. Best effort.
    fn disconnect(&mut self) -> impl Future<Output = ()>;
}

/// Bounds on how long the node keeps its radio on trying to connect.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Connect attempts before giving up. Zero is treated as one.
    pub max_attempts: u8,
    /// Upper bound for a single connect attempt.
    pub attempt_timeout_ms: u32,
    /// Pause between failed attempts.
    pub retry_delay_ms: u32,
}

impl RetryPolicy {
    pub const DEFAULT: Self = Self {
        max_attempts: 5,
        attempt_timeout_ms: 10_000,
        retry_delay_ms: 5_000,
    };

    pub fn attempts(&self) -> u8 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Broker topics the readings are published to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topics<'a> {
    pub temperature: &'a str,
    pub battery: &'a str,
}

/// What happened to a publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Both readings were handed to the broker.
    Delivered { attempts: u8 },
    /// The link never came up within the retry budget.
    ConnectFailed { attempts: u8, last_error: ConnError },
    /// Connected, but at least one publish failed.
    PublishFailed { attempts: u8, error: ConnError },
}

impl PublishOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Format a reading with fixed two-decimal precision.
pub fn format_reading(value: f32) -> Result<Payload, ConnError> {
    let mut payload = Payload::new();
    write!(payload, "{:.2}", value).map_err(|_| ConnError::PayloadTooLarge)?;
    Ok(payload)
}

/// Try to connect at most `policy.attempts()` times.
///
/// Each attempt is raced against `attempt_timeout_ms`. Returns the number of
/// attempts used, or the attempt count together with the last error.
pub async fn connect_with_retry<T, D>(
    transport: &mut T,
    delay: &mut D,
    policy: &RetryPolicy,
) -> Result<u8, (u8, ConnError)>
where
    T: Transport,
    D: DelayNs,
{
    let attempts = policy.attempts();
    let mut last_error = ConnError::LinkDown;

    for attempt in 1..=attempts {
        let result = match select(
            transport.connect(),
            delay.delay_ms(policy.attempt_timeout_ms),
        )
        .await
        {
            Either::First(result) => result,
            Either::Second(()) => Err(ConnError::Timeout),
        };

        match result {
            Ok(()) => {
                debug!("Connected on attempt {}/{}", attempt, attempts);
                return Ok(attempt);
            }
            Err(e) => {
                warn!("Connect attempt {}/{} failed: {}", attempt, attempts, e);
                last_error = e;
            }
        }

        if attempt < attempts {
            delay.delay_ms(policy.retry_delay_ms).await;
        }
    }

    Err((attempts, last_error))
}

/// Connect, publish temperature then battery, and disconnect.
///
/// Both publishes are attempted even if the first one fails; the first
/// failure is reported.
pub async fn publish_readings<T, D>(
    transport: &mut T,
    delay: &mut D,
    policy: &RetryPolicy,
    topics: &Topics<'_>,
    temperature: f32,
    battery: f32,
) -> PublishOutcome
where
    T: Transport,
    D: DelayNs,
{
    let attempts = match connect_with_retry(transport, delay, policy).await {
        Ok(attempts) => attempts,
        Err((attempts, last_error)) => {
            warn!("Giving up on the link after {} attempts", attempts);
            return PublishOutcome::ConnectFailed {
                attempts,
                last_error,
            };
        }
    };

    let mut first_error = None;
    for (topic, value) in [(topics.temperature, temperature), (topics.battery, battery)] {
        let sent = match format_reading(value) {
            Ok(payload) => {
                info!("Sending {} -> {}", payload, topic);
                transport.publish(topic, &payload).await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = sent {
            warn!("Publish to {} failed: {}", topic, e);
            if first_error.is_none() {
                first_error = Some(e);
            }
        }
    }

    info!("Closing broker connection");
    transport.disconnect().await;

    match first_error {
        None => PublishOutcome::Delivered { attempts },
        Some(error) => PublishOutcome::PublishFailed { attempts, error },
    }
}
