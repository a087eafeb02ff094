//! Whole wake cycles against scripted collaborators.
//!
//! Every cycle builds a fresh controller from the medium left behind by the
//! previous one, the same way the node comes out of deep sleep.

use dozer_core::config::{CycleConfig, FailedPublishPolicy, NodeConfig};
use dozer_core::cycle::{CycleController, CyclePhase, CycleReport, run_wake_cycle};
use dozer_core::persistence::{
    DurableRecord, DurableStore, EEPROM_REGION_SIZE, EmulatedEeprom, RECORD_SIZE, RamStorage,
};
use dozer_core::power::PowerControl;
use dozer_core::sensors::{Acquisition, SensorError};
use dozer_core::transport::{ConnError, PublishOutcome, RetryPolicy, Transport};
use embassy_futures::block_on;
use embassy_time::Duration;
use embedded_hal_async::delay::DelayNs;

struct FixedSensors {
    temperature: Result<f32, SensorError>,
    battery: f32,
}

impl FixedSensors {
    fn new(temperature: f32, battery: f32) -> Self {
        Self {
            temperature: Ok(temperature),
            battery,
        }
    }
}

impl Acquisition for FixedSensors {
    async fn read_temperature(&mut self) -> Result<f32, SensorError> {
        self.temperature
    }

    async fn read_supply_voltage(&mut self) -> Result<f32, SensorError> {
        Ok(self.battery)
    }
}

#[derive(Clone, Copy)]
enum LinkBehavior {
    Up,
    Refusing,
    Hanging,
    DroppingPublishes,
}

struct RecordingTransport {
    behavior: LinkBehavior,
    connects: usize,
    disconnects: usize,
    published: Vec<(String, String)>,
}

impl RecordingTransport {
    fn new(behavior: LinkBehavior) -> Self {
        Self {
            behavior,
            connects: 0,
            disconnects: 0,
            published: Vec::new(),
        }
    }
}

impl Transport for RecordingTransport {
    async fn connect(&mut self) -> Result<(), ConnError> {
        self.connects += 1;
        match self.behavior {
            LinkBehavior::Up | LinkBehavior::DroppingPublishes => Ok(()),
            LinkBehavior::Refusing => Err(ConnError::Refused(-2)),
            LinkBehavior::Hanging => core::future::pending().await,
        }
    }

    async fn publish(&mut self, topic: &str, payload: &str) -> Result<(), ConnError> {
        if let LinkBehavior::DroppingPublishes = self.behavior {
            return Err(ConnError::PublishFailed);
        }
        self.published.push((topic.to_string(), payload.to_string()));
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.disconnects += 1;
    }
}

/// Completes immediately, so timeouts fire as soon as a connect is pending.
struct InstantDelay;

impl DelayNs for InstantDelay {
    async fn delay_ns(&mut self, _ns: u32) {}
}

#[derive(Default)]
struct RecordingPower {
    sleeps: Vec<Duration>,
}

impl PowerControl for RecordingPower {
    async fn sleep_for(&mut self, duration: Duration) {
        self.sleeps.push(duration);
    }
}

fn config() -> NodeConfig<'static> {
    let mut config = NodeConfig::compiled();
    config.cycle = CycleConfig {
        temperature_offset: 0.5,
        battery_offset: 50.0,
        max_wake_count: 10,
        sleep_secs: 30,
        failed_publish: FailedPublishPolicy::CommitAnyway,
    };
    config.retry = RetryPolicy {
        max_attempts: 3,
        attempt_timeout_ms: 1_000,
        retry_delay_ms: 5_000,
    };
    config
}

fn medium_with(record: DurableRecord) -> EmulatedEeprom {
    let mut image = [0u8; EEPROM_REGION_SIZE];
    image[..RECORD_SIZE].copy_from_slice(&record.to_bytes());
    RamStorage::from_image(image)
}

/// Run one wake on `medium` and return the report, the transport, and the
/// medium after a power cycle.
fn wake(
    config: NodeConfig<'static>,
    medium: EmulatedEeprom,
    sensors: FixedSensors,
    behavior: LinkBehavior,
) -> (
    Result<CycleReport, dozer_core::cycle::CycleError>,
    RecordingTransport,
    EmulatedEeprom,
    usize,
) {
    let mut controller = CycleController::new(
        config,
        DurableStore::new(medium),
        sensors,
        RecordingTransport::new(behavior),
        InstantDelay,
    );
    let mut power = RecordingPower::default();

    let result = block_on(run_wake_cycle(&mut controller, &mut power));
    if result.is_ok() {
        assert_eq!(controller.phase(), CyclePhase::Done);
    }
    // Sleep follows every cycle, failed or not.
    assert_eq!(power.sleeps, [Duration::from_secs(30)]);

    let (store, _, transport) = controller.into_parts();
    let mut medium = store.into_medium();
    let writes = medium.write_count();
    medium.power_cycle();

    (result, transport, medium, writes)
}

fn persisted(medium: &mut EmulatedEeprom) -> DurableRecord {
    // Borrow the medium; `&mut S` is itself a medium.
    DurableStore::new(medium).load().unwrap()
}

#[test]
fn test_quiet_cycle_writes_only_the_counter() {
    let medium = medium_with(DurableRecord::new(2, 20.0, 3000.0));

    let (result, transport, mut medium, writes) = wake(
        config(),
        medium,
        FixedSensors::new(20.4, 3020.0),
        LinkBehavior::Up,
    );

    let report = result.unwrap();
    assert_eq!(report.outcome, None);
    assert_eq!(transport.connects, 0);
    assert_eq!(writes, 1);
    assert_eq!(persisted(&mut medium), DurableRecord::new(3, 20.0, 3000.0));
}

#[test]
fn test_significant_change_publishes_both_values() {
    let medium = medium_with(DurableRecord::new(2, 20.0, 3000.0));

    let (result, transport, mut medium, _) = wake(
        config(),
        medium,
        FixedSensors::new(20.6, 3012.0),
        LinkBehavior::Up,
    );

    let report = result.unwrap();
    assert!(report.decision.temperature_changed);
    assert!(!report.decision.battery_changed);
    assert_eq!(report.outcome, Some(PublishOutcome::Delivered { attempts: 1 }));
    assert_eq!(
        transport.published,
        [
            ("/sensors/test/temperature".to_string(), "20.60".to_string()),
            ("/sensors/test/battery".to_string(), "3012.00".to_string()),
        ]
    );
    assert_eq!(transport.disconnects, 1);
    assert_eq!(persisted(&mut medium), DurableRecord::new(0, 20.6, 3012.0));
}

#[test]
fn test_ninth_quiet_wake_forces_publish() {
    let medium = medium_with(DurableRecord::new(9, 20.0, 3000.0));

    let (result, transport, mut medium, _) = wake(
        config(),
        medium,
        FixedSensors::new(20.0, 3000.0),
        LinkBehavior::Up,
    );

    let report = result.unwrap();
    assert!(report.decision.forced);
    assert_eq!(transport.published.len(), 2);
    assert_eq!(persisted(&mut medium).wake_count, 0);
}

#[test]
fn test_counter_climbs_until_forced_publish() {
    let mut medium = medium_with(DurableRecord::new(3, 20.0, 3000.0));
    let mut counters = Vec::new();

    loop {
        let (result, transport, next, _) = wake(
            config(),
            medium,
            FixedSensors::new(20.1, 3010.0),
            LinkBehavior::Up,
        );
        medium = next;
        let report = result.unwrap();
        counters.push(report.persisted.wake_count);
        if !transport.published.is_empty() {
            break;
        }
    }

    assert_eq!(counters, [4, 5, 6, 7, 8, 9, 0]);
    assert_eq!(persisted(&mut medium), DurableRecord::new(0, 20.1, 3010.0));
}

#[test]
fn test_erased_medium_converges_on_first_boot() {
    let medium = RamStorage::from_image([0xFF; EEPROM_REGION_SIZE]);

    let (result, transport, mut medium, _) = wake(
        config(),
        medium,
        FixedSensors::new(21.0, 3100.0),
        LinkBehavior::Up,
    );

    assert!(result.unwrap().decision.should_publish());
    assert_eq!(transport.published.len(), 2);
    assert_eq!(persisted(&mut medium), DurableRecord::new(0, 21.0, 3100.0));
}

#[test]
fn test_arbitrary_first_boot_bytes_never_crash() {
    let images: [[u8; RECORD_SIZE]; 4] = [
        [0x00; RECORD_SIZE],
        [0x7F, 0xFF, 0xFF, 0x7F, 0x00, 0x00, 0x80, 0x7F, 0x01, 0x00, 0x80, 0xFF],
        [0x00, 0x00, 0x00, 0x80, 0xFF, 0xFF, 0x7F, 0x7F, 0x00, 0x00, 0x00, 0x00],
        [0xA5; RECORD_SIZE],
    ];

    for bytes in images {
        let medium = medium_with(DurableRecord::from_bytes(&bytes));
        let (result, _, mut medium, _) = wake(
            config(),
            medium,
            FixedSensors::new(19.0, 2900.0),
            LinkBehavior::Up,
        );

        let report = result.unwrap();
        let stored = persisted(&mut medium);
        assert!(stored.wake_count >= 0);
        assert!(stored.wake_count < config().cycle.max_wake_count);
        assert_eq!(report.persisted, stored);
    }
}

#[test]
fn test_refused_link_is_retried_a_bounded_number_of_times() {
    let medium = medium_with(DurableRecord::new(1, 20.0, 3000.0));

    let (result, transport, mut medium, _) = wake(
        config(),
        medium,
        FixedSensors::new(30.0, 3000.0),
        LinkBehavior::Refusing,
    );

    assert_eq!(
        result.unwrap().outcome,
        Some(PublishOutcome::ConnectFailed {
            attempts: 3,
            last_error: ConnError::Refused(-2),
        })
    );
    assert_eq!(transport.connects, 3);
    assert_eq!(transport.disconnects, 0);
    // Source behavior: the new values are committed even though nothing went out.
    assert_eq!(persisted(&mut medium), DurableRecord::new(0, 30.0, 3000.0));
}

#[test]
fn test_hanging_connect_times_out() {
    let medium = medium_with(DurableRecord::new(1, 20.0, 3000.0));

    let (result, transport, _, _) = wake(
        config(),
        medium,
        FixedSensors::new(30.0, 3000.0),
        LinkBehavior::Hanging,
    );

    assert_eq!(
        result.unwrap().outcome,
        Some(PublishOutcome::ConnectFailed {
            attempts: 3,
            last_error: ConnError::Timeout,
        })
    );
    assert_eq!(transport.connects, 3);
}

#[test]
fn test_undelivered_publish_can_retain_previous_values() {
    let mut cfg = config();
    cfg.cycle.failed_publish = FailedPublishPolicy::RetainPrevious;
    let medium = medium_with(DurableRecord::new(4, 20.0, 3000.0));

    let (result, transport, mut medium, _) = wake(
        cfg,
        medium,
        FixedSensors::new(30.0, 3000.0),
        LinkBehavior::DroppingPublishes,
    );

    assert_eq!(
        result.unwrap().outcome,
        Some(PublishOutcome::PublishFailed {
            attempts: 1,
            error: ConnError::PublishFailed,
        })
    );
    assert_eq!(transport.disconnects, 1);
    assert_eq!(persisted(&mut medium), DurableRecord::new(5, 20.0, 3000.0));
}

#[test]
fn test_sensor_failure_still_advances_counter() {
    let medium = medium_with(DurableRecord::new(4, 20.0, 3000.0));
    let sensors = FixedSensors {
        temperature: Err(SensorError::InvalidReading {
            sensor: "DS18B20",
            attempts: 10,
        }),
        battery: 3000.0,
    };

    let (result, transport, mut medium, _) = wake(config(), medium, sensors, LinkBehavior::Up);

    assert!(matches!(
        result,
        Err(dozer_core::cycle::CycleError::Sensor(SensorError::InvalidReading { .. }))
    ));
    assert_eq!(transport.connects, 0);
    assert_eq!(persisted(&mut medium), DurableRecord::new(5, 20.0, 3000.0));
}

#[test]
fn test_commit_failure_loses_only_this_cycle() {
    let before = DurableRecord::new(4, 20.0, 3000.0);
    let mut medium = medium_with(before);
    medium.inject_commit_failure();

    let (result, _, mut medium, _) = wake(
        config(),
        medium,
        FixedSensors::new(30.0, 3000.0),
        LinkBehavior::Up,
    );

    assert!(matches!(result, Err(dozer_core::cycle::CycleError::Storage(_))));
    assert_eq!(persisted(&mut medium), before);
}
