//! The publish decision for one wake cycle.
//!
//! Everything here is a pure function of the durable record, the fresh
//! samples, and the configuration, so whole cycles can be checked without
//! hardware. [`CycleController`] wires it to storage and the collaborators.

mod controller;

pub use controller::{CycleController, CyclePhase, CycleReport, run_wake_cycle};

use log::warn;
use thiserror_no_std::Error;

use crate::config::{CycleConfig, FailedPublishPolicy};
use crate::metric::{HysteresisFilter, MetricError};
use crate::persistence::{DurableRecord, StorageError};
use crate::sensors::SensorError;
use crate::transport::PublishOutcome;

#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum CycleError {
    #[error("Storage error: {0}")]
    Storage(StorageError),
    #[error("Sensor error: {0}")]
    Sensor(SensorError),
    #[error("Rejected non-finite {metric} sample {value}")]
    InvalidSample { metric: &'static str, value: f32 },
    #[error("Invalid metric configuration: {0}")]
    Metric(MetricError),
}

/// One wake's readings, guaranteed finite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreshSamples {
    temperature: f32,
    battery: f32,
}

impl FreshSamples {
    pub fn new(temperature: f32, battery: f32) -> Result<Self, CycleError> {
        for (metric, value) in [("temperature", temperature), ("battery", battery)] {
            if !value.is_finite() {
                return Err(CycleError::InvalidSample { metric, value });
            }
        }

        Ok(Self {
            temperature,
            battery,
        })
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn battery(&self) -> f32 {
        self.battery
    }
}

/// Why a cycle did or did not publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishDecision {
    /// The wake counter reached `max_wake_count`.
    pub forced: bool,
    pub temperature_changed: bool,
    pub battery_changed: bool,
}

impl PublishDecision {
    pub fn should_publish(&self) -> bool {
        self.forced || self.temperature_changed || self.battery_changed
    }
}

/// Working state of one wake cycle, rebuilt from the durable record on every
/// wake and consumed when the cycle settles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleState {
    wake_count: i32,
    max_wake_count: i32,
    temperature: HysteresisFilter,
    battery: HysteresisFilter,
}

impl CycleState {
    /// Rehydrate the filters and advance the wake counter by one.
    ///
    /// A negative persisted counter can only come from an uninitialized
    /// medium; it is bumped to `max_wake_count` so this cycle publishes.
    pub fn rehydrate(record: &DurableRecord, config: &CycleConfig) -> Result<Self, MetricError> {
        let temperature =
            HysteresisFilter::with_value(config.temperature_offset, record.temperature)?;
        let battery = HysteresisFilter::with_value(config.battery_offset, record.battery)?;

        let wake_count = if record.wake_count < 0 {
            warn!(
                "Persisted wake count {} is not plausible, forcing a publish",
                record.wake_count
            );
            config.max_wake_count
        } else {
            record.wake_count.saturating_add(1)
        };

        Ok(Self {
            wake_count,
            max_wake_count: config.max_wake_count,
            temperature,
            battery,
        })
    }

    /// Counter value for this cycle, already incremented.
    pub fn wake_count(&self) -> i32 {
        self.wake_count
    }

    pub fn temperature(&self) -> &HysteresisFilter {
        &self.temperature
    }

    pub fn battery(&self) -> &HysteresisFilter {
        &self.battery
    }

    pub fn decide(&self, samples: &FreshSamples) -> PublishDecision {
        PublishDecision {
            forced: self.wake_count >= self.max_wake_count,
            temperature_changed: self.temperature.evaluate(samples.temperature),
            battery_changed: self.battery.evaluate(samples.battery),
        }
    }

    /// Produce the record to persist.
    ///
    /// `outcome` is `None` when nothing was published. With
    /// [`FailedPublishPolicy::RetainPrevious`] an undelivered publish leaves
    /// the metric values and the counter as they were, so the next wake
    /// tries again.
    pub fn settle(
        mut self,
        samples: &FreshSamples,
        decision: &PublishDecision,
        outcome: Option<&PublishOutcome>,
        policy: FailedPublishPolicy,
    ) -> DurableRecord {
        let delivered = outcome.is_some_and(PublishOutcome::is_delivered);
        let commit = decision.should_publish()
            && (delivered || policy == FailedPublishPolicy::CommitAnyway);

        if commit {
            self.temperature.commit(samples.temperature);
            self.battery.commit(samples.battery);
            self.wake_count = 0;
        }

        DurableRecord {
            wake_count: self.wake_count,
            temperature: self.temperature.current_value(),
            battery: self.battery.current_value(),
        }
    }
}

/// The whole decision as one pure step, assuming any publish is delivered.
pub fn evaluate_cycle(
    record: &DurableRecord,
    samples: &FreshSamples,
    config: &CycleConfig,
) -> Result<(DurableRecord, PublishDecision), MetricError> {
    let state = CycleState::rehydrate(record, config)?;
    let decision = state.decide(samples);
    let outcome = decision
        .should_publish()
        .then_some(PublishOutcome::Delivered { attempts: 1 });

    let next = state.settle(samples, &decision, outcome.as_ref(), config.failed_publish);
    Ok((next, decision))
}
