//! Durable state that survives deep sleep.
//!
//! Deep sleep on the node is a full reboot, so the wake counter and the last
//! published metric values are kept in a tiny non-volatile record:
//!
//! | Offset | Size | Field                          |
//! |--------|------|--------------------------------|
//! | 0      | 4    | wake counter (`i32`, LE)       |
//! | 4      | 4    | temperature (`f32`, LE)        |
//! | 8      | 4    | battery (`f32`, LE)            |
//!
//! Storage media implement [`NvStorage`]. Writes are staged and only become
//! durable on [`NvStorage::commit`]; power loss before that point leaves the
//! previously committed bytes untouched.

pub mod ram;

pub use ram::{EmulatedEeprom, RamStorage};

use log::{debug, warn};
use thiserror_no_std::Error;

/// Size of the emulated EEPROM region reserved for the record.
pub const EEPROM_REGION_SIZE: usize = 64;

pub const COUNTER_OFFSET: usize = 0;
pub const TEMPERATURE_OFFSET: usize = 4;
pub const BATTERY_OFFSET: usize = 8;

/// Size of the encoded [`DurableRecord`].
pub const RECORD_SIZE: usize = 12;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    #[error("{len} bytes at offset {offset} do not fit a {capacity}-byte medium")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },
    #[error("storage read failed: {details}")]
    ReadFailed { details: &'static str },
    #[error("storage write failed: {details}")]
    WriteFailed { details: &'static str },
    #[error("storage commit failed: {details}")]
    CommitFailed { details: &'static str },
}

/// A byte-addressed non-volatile medium with deferred writes.
///
/// Implementations are blocking and exclusively owned for the duration of a
/// wake cycle.
pub trait NvStorage {
    /// Number of addressable bytes.
    fn capacity(&self) -> usize;

    /// Read `buf.len()` bytes starting at `offset`, including staged writes.
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError>;

    /// Stage `bytes` at `offset`. Not durable until [`commit`](Self::commit).
    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError>;

    /// Make all staged writes durable.
    fn commit(&mut self) -> Result<(), StorageError>;
}

impl<S: NvStorage + ?Sized> NvStorage for &mut S {
    fn capacity(&self) -> usize {
        (**self).capacity()
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        (**self).read(offset, buf)
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError> {
        (**self).write(offset, bytes)
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        (**self).commit()
    }
}

/// Bounds check for media implementations.
pub fn check_bounds(offset: usize, len: usize, capacity: usize) -> Result<(), StorageError> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(StorageError::OutOfBounds {
            offset,
            len,
            capacity,
        }),
    }
}

/// The persisted tuple `(wake_count, temperature, battery)`.
///
/// Values read back from a medium that was never written are arbitrary and
/// must be treated as untrusted.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DurableRecord {
    pub wake_count: i32,
    pub temperature: f32,
    pub battery: f32,
}

impl DurableRecord {
    pub const fn new(wake_count: i32, temperature: f32, battery: f32) -> Self {
        Self {
            wake_count,
            temperature,
            battery,
        }
    }

    /// Encode into the on-medium layout.
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut bytes = [0u8; RECORD_SIZE];
        bytes[COUNTER_OFFSET..TEMPERATURE_OFFSET].copy_from_slice(&self.wake_count.to_le_bytes());
        bytes[TEMPERATURE_OFFSET..BATTERY_OFFSET].copy_from_slice(&self.temperature.to_le_bytes());
        bytes[BATTERY_OFFSET..RECORD_SIZE].copy_from_slice(&self.battery.to_le_bytes());
        bytes
    }

    /// Decode from the on-medium layout. Every bit pattern is accepted.
    pub fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Self {
        let mut word = [0u8; 4];

        word.copy_from_slice(&bytes[COUNTER_OFFSET..TEMPERATURE_OFFSET]);
        let wake_count = i32::from_le_bytes(word);

        word.copy_from_slice(&bytes[TEMPERATURE_OFFSET..BATTERY_OFFSET]);
        let temperature = f32::from_le_bytes(word);

        word.copy_from_slice(&bytes[BATTERY_OFFSET..RECORD_SIZE]);
        let battery = f32::from_le_bytes(word);

        Self {
            wake_count,
            temperature,
            battery,
        }
    }
}

/// The record plus a shadow copy used to skip writes that would not change
/// the medium.
pub struct DurableStore<S: NvStorage> {
    medium: S,
    /// Mirror of what the medium holds. `None` until the first load, in which
    /// case every set goes to the medium.
    shadow: Option<DurableRecord>,
}

impl<S: NvStorage> DurableStore<S> {
    pub fn new(medium: S) -> Self {
        Self {
            medium,
            shadow: None,
        }
    }

    /// Read the full record from the medium.
    pub fn load(&mut self) -> Result<DurableRecord, StorageError> {
        let capacity = self.medium.capacity();
        check_bounds(COUNTER_OFFSET, RECORD_SIZE, capacity)?;

        let mut bytes = [0u8; RECORD_SIZE];
        self.medium.read(COUNTER_OFFSET, &mut bytes)?;

        let record = DurableRecord::from_bytes(&bytes);
        debug!("Loaded durable record: {:?}", record);
        self.shadow = Some(record);
        Ok(record)
    }

    /// The record as last loaded or written, if any.
    pub fn record(&self) -> Option<DurableRecord> {
        self.shadow
    }

    pub fn set_counter(&mut self, value: i32) -> Result<(), StorageError> {
        let current = self.shadow.map(|r| r.wake_count);
        if current == Some(value) {
            return Ok(());
        }

        self.medium.write(COUNTER_OFFSET, &value.to_le_bytes())?;
        self.update_shadow(|r| r.wake_count = value);
        Ok(())
    }

    pub fn set_temperature(&mut self, value: f32) -> Result<(), StorageError> {
        let current = self.shadow.map(|r| r.temperature.to_bits());
        if current == Some(value.to_bits()) {
            return Ok(());
        }

        self.medium.write(TEMPERATURE_OFFSET, &value.to_le_bytes())?;
        self.update_shadow(|r| r.temperature = value);
        Ok(())
    }

    pub fn set_battery(&mut self, value: f32) -> Result<(), StorageError> {
        let current = self.shadow.map(|r| r.battery.to_bits());
        if current == Some(value.to_bits()) {
            return Ok(());
        }

        self.medium.write(BATTERY_OFFSET, &value.to_le_bytes())?;
        self.update_shadow(|r| r.battery = value);
        Ok(())
    }

    /// Write every field of `record` that differs from the shadow.
    pub fn store(&mut self, record: &DurableRecord) -> Result<(), StorageError> {
        self.set_counter(record.wake_count)?;
        self.set_temperature(record.temperature)?;
        self.set_battery(record.battery)
    }

    /// Finalize pending writes. Must be the last persistence call before the
    /// node may lose power.
    pub fn commit(&mut self) -> Result<(), StorageError> {
        self.medium.commit().inspect_err(|e| {
            warn!("Durable record commit failed: {}", e);
        })
    }

    pub fn medium(&self) -> &S {
        &self.medium
    }

    pub fn medium_mut(&mut self) -> &mut S {
        &mut self.medium
    }

    pub fn into_medium(self) -> S {
        self.medium
    }

    fn update_shadow(&mut self, apply: impl FnOnce(&mut DurableRecord)) {
        // Without a prior load only the written field is known, so the
        // shadow stays empty and the next set also goes to the medium.
        if let Some(record) = self.shadow.as_mut() {
            apply(record);
        }
    }
}
