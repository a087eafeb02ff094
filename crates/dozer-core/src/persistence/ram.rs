use log::{debug, error};

use super::{EEPROM_REGION_SIZE, NvStorage, StorageError, check_bounds};

/// The EEPROM emulation region used by the node.
pub type EmulatedEeprom = RamStorage<EEPROM_REGION_SIZE>;

/// RAM-cached medium modeled on flash-backed EEPROM emulation.
///
/// Reads and writes hit a RAM cache; [`commit`](NvStorage::commit) copies the
/// cache into the committed image, and only when something changed.
/// [`power_cycle`](RamStorage::power_cycle) throws the cache away, which is
/// what a brown-out between write and commit does to real hardware.
pub struct RamStorage<const N: usize> {
    committed: [u8; N],
    cache: [u8; N],
    dirty: bool,
    write_count: usize,
    flush_count: usize,
    fail_writes: bool,
    fail_commit: bool,
}

impl<const N: usize> RamStorage<N> {
    /// A medium whose committed image is all zeroes.
    pub const fn new() -> Self {
        Self::from_image([0; N])
    }

    /// A medium holding arbitrary bytes, e.g. erased flash (`0xFF`) on first boot.
    pub const fn from_image(image: [u8; N]) -> Self {
        Self {
            committed: image,
            cache: image,
            dirty: false,
            write_count: 0,
            flush_count: 0,
            fail_writes: false,
            fail_commit: false,
        }
    }

    /// Simulate power loss: staged writes are dropped, the committed image
    /// is reloaded into the cache, and the counters restart.
    pub fn power_cycle(&mut self) {
        self.cache = self.committed;
        self.dirty = false;
        self.write_count = 0;
        self.flush_count = 0;
    }

    pub fn committed_image(&self) -> &[u8; N] {
        &self.committed
    }

    /// Number of write calls that reached the medium since the last power cycle.
    pub fn write_count(&self) -> usize {
        self.write_count
    }

    /// Number of commits that actually flushed data since the last power cycle.
    pub fn flush_count(&self) -> usize {
        self.flush_count
    }

    /// Make every following write fail.
    pub fn inject_write_failure(&mut self) {
        self.fail_writes = true;
    }

    /// Make every following commit fail.
    pub fn inject_commit_failure(&mut self) {
        self.fail_commit = true;
    }
}

impl<const N: usize> Default for RamStorage<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> NvStorage for RamStorage<N> {
    fn capacity(&self) -> usize {
        N
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        check_bounds(offset, buf.len(), N)?;
        buf.copy_from_slice(&self.cache[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError> {
        check_bounds(offset, bytes.len(), N)?;
        if self.fail_writes {
            error!("RAM storage write of {} bytes at {} failed", bytes.len(), offset);
            return Err(StorageError::WriteFailed {
                details: "injected write failure",
            });
        }

        self.cache[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.dirty = true;
        self.write_count += 1;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        if self.fail_commit {
            error!("RAM storage commit failed");
            return Err(StorageError::CommitFailed {
                details: "injected commit failure",
            });
        }

        if self.dirty {
            self.committed = self.cache;
            self.dirty = false;
            self.flush_count += 1;
            debug!("RAM storage flushed {} bytes", N);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_flushes_only_when_dirty() {
        let mut medium = RamStorage::<16>::new();
        medium.commit().unwrap();
        assert_eq!(medium.flush_count(), 0);

        medium.write(2, &[7, 8]).unwrap();
        medium.commit().unwrap();
        medium.commit().unwrap();

        assert_eq!(medium.flush_count(), 1);
        assert_eq!(&medium.committed_image()[..4], &[0, 0, 7, 8]);
    }

    #[test]
    fn test_reads_see_staged_writes() {
        let mut medium = RamStorage::<8>::from_image([0xFF; 8]);
        medium.write(0, &[1, 2, 3, 4]).unwrap();

        let mut buf = [0u8; 6];
        medium.read(0, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 0xFF, 0xFF]);
        assert_eq!(medium.committed_image(), &[0xFF; 8]);
    }

    #[test]
    fn test_out_of_bounds_access_is_rejected() {
        let mut medium = RamStorage::<8>::new();
        let mut buf = [0u8; 4];

        assert!(matches!(
            medium.read(6, &mut buf),
            Err(StorageError::OutOfBounds { offset: 6, len: 4, capacity: 8 })
        ));
        assert!(medium.write(usize::MAX, &[1]).is_err());
        assert_eq!(medium.write_count(), 0);
    }

    #[test]
    fn test_failed_commit_keeps_previous_image() {
        let mut medium = RamStorage::<4>::from_image([9; 4]);
        medium.write(0, &[1]).unwrap();
        medium.inject_commit_failure();

        assert!(medium.commit().is_err());
        medium.power_cycle();
        assert_eq!(medium.committed_image(), &[9; 4]);
    }
}
