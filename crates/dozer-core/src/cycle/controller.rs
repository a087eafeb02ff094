use embedded_hal_async::delay::DelayNs;
use log::{debug, error, info, warn};

use super::{CycleError, CycleState, FreshSamples, PublishDecision};
use crate::config::NodeConfig;
use crate::persistence::{DurableRecord, DurableStore, NvStorage};
use crate::power::PowerControl;
use crate::sensors::Acquisition;
use crate::transport::{PublishOutcome, Transport, publish_readings};

/// Where a wake cycle currently is. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Sampling,
    Deciding,
    Publishing,
    Persisting,
    Done,
}

/// Summary of a completed wake cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    pub loaded: DurableRecord,
    pub samples: FreshSamples,
    pub decision: PublishDecision,
    /// `None` when the cycle did not publish.
    pub outcome: Option<PublishOutcome>,
    pub persisted: DurableRecord,
}

/// Runs one wake cycle against real or simulated collaborators.
///
/// A controller is built fresh on every wake and used once; nothing in it
/// outlives the cycle except what it commits to the store.
pub struct CycleController<'c, S, A, T, D>
where
    S: NvStorage,
    A: Acquisition,
    T: Transport,
    D: DelayNs,
{
    config: NodeConfig<'c>,
    store: DurableStore<S>,
    acquisition: A,
    transport: T,
    delay: D,
    phase: CyclePhase,
}

impl<'c, S, A, T, D> CycleController<'c, S, A, T, D>
where
    S: NvStorage,
    A: Acquisition,
    T: Transport,
    D: DelayNs,
{
    pub fn new(
        config: NodeConfig<'c>,
        store: DurableStore<S>,
        acquisition: A,
        transport: T,
        delay: D,
    ) -> Self {
        Self {
            config,
            store,
            acquisition,
            transport,
            delay,
            phase: CyclePhase::Idle,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn config(&self) -> &NodeConfig<'c> {
        &self.config
    }

    /// Give the collaborators back once the cycle is over.
    pub fn into_parts(self) -> (DurableStore<S>, A, T) {
        (self.store, self.acquisition, self.transport)
    }

    fn enter(&mut self, phase: CyclePhase) {
        debug!("Cycle phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Walk the cycle once: load, sample, decide, maybe publish, persist.
    ///
    /// If sampling fails the incremented counter is still persisted, so the
    /// forced publish keeps approaching. Storage failures end the cycle.
    pub async fn run(&mut self) -> Result<CycleReport, CycleError> {
        if self.phase != CyclePhase::Idle {
            warn!("Cycle controller reused after {:?}", self.phase);
        }

        let loaded = self.store.load().map_err(CycleError::Storage)?;
        let state =
            CycleState::rehydrate(&loaded, &self.config.cycle).map_err(CycleError::Metric)?;
        info!(
            "Wake {} of {} since last publish",
            state.wake_count(),
            self.config.cycle.max_wake_count
        );

        self.enter(CyclePhase::Sampling);
        let samples = match self.sample().await {
            Ok(samples) => samples,
            Err(e) => {
                error!("Sampling failed, keeping previous values: {}", e);
                self.enter(CyclePhase::Persisting);
                self.persist_counter_only(state.wake_count())?;
                self.enter(CyclePhase::Done);
                return Err(e);
            }
        };

        self.enter(CyclePhase::Deciding);
        let decision = state.decide(&samples);

        let outcome = if decision.should_publish() {
            info!("Publishing: {:?}", decision);
            self.enter(CyclePhase::Publishing);
            let outcome = publish_readings(
                &mut self.transport,
                &mut self.delay,
                &self.config.retry,
                &self.config.broker.topics(),
                samples.temperature(),
                samples.battery(),
            )
            .await;

            if !outcome.is_delivered() {
                warn!("Publish not delivered: {:?}", outcome);
            }
            Some(outcome)
        } else {
            info!("Nothing interesting to send");
            None
        };

        self.enter(CyclePhase::Persisting);
        let persisted = state.settle(
            &samples,
            &decision,
            outcome.as_ref(),
            self.config.cycle.failed_publish,
        );
        self.store
            .store(&persisted)
            .and_then(|()| self.store.commit())
            .map_err(CycleError::Storage)?;
        debug!("Persisted durable record: {:?}", persisted);

        self.enter(CyclePhase::Done);
        Ok(CycleReport {
            loaded,
            samples,
            decision,
            outcome,
            persisted,
        })
    }

    async fn sample(&mut self) -> Result<FreshSamples, CycleError> {
        let temperature = self
            .acquisition
            .read_temperature()
            .await
            .map_err(CycleError::Sensor)?;
        let battery = self
            .acquisition
            .read_supply_voltage()
            .await
            .map_err(CycleError::Sensor)?;

        debug!("Sampled temperature {} and supply {}", temperature, battery);
        FreshSamples::new(temperature, battery)
    }

    fn persist_counter_only(&mut self, wake_count: i32) -> Result<(), CycleError> {
        self.store
            .set_counter(wake_count)
            .and_then(|()| self.store.commit())
            .map_err(CycleError::Storage)
    }
}

/// Run one cycle and then hand the node to `power` for the configured sleep.
///
/// Sleep happens whatever the cycle result was; a failed cycle is logged and
/// returned for callers that outlive the sleep (simulators, tests).
pub async fn run_wake_cycle<S, A, T, D, P>(
    controller: &mut CycleController<'_, S, A, T, D>,
    power: &mut P,
) -> Result<CycleReport, CycleError>
where
    S: NvStorage,
    A: Acquisition,
    T: Transport,
    D: DelayNs,
    P: PowerControl,
{
    let result = controller.run().await;
    if let Err(e) = &result {
        error!("Wake cycle failed: {}", e);
    }

    let interval = controller.config().cycle.sleep_interval();
    info!("Entering deep sleep for {} seconds", interval.as_secs());
    power.sleep_for(interval).await;

    result
}
