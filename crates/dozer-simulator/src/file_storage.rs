//! Host file standing in for the node's EEPROM region.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use dozer_core::persistence::{EEPROM_REGION_SIZE, NvStorage, StorageError, check_bounds};
use log::{debug, error, info};

/// Non-volatile medium backed by a file.
///
/// The image is read once at open. Writes go to RAM; commit writes a sibling
/// temp file and renames it over the image, so a crash mid-commit leaves the
/// previous image intact.
pub struct FileStorage {
    path: PathBuf,
    cache: [u8; EEPROM_REGION_SIZE],
    dirty: bool,
    writes: usize,
}

impl FileStorage {
    /// Open the image at `path`. A missing file reads as erased flash, and a
    /// short file is padded with erased bytes.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut cache = [0xFF; EEPROM_REGION_SIZE];

        match fs::read(&path) {
            Ok(bytes) => {
                let len = bytes.len().min(EEPROM_REGION_SIZE);
                cache[..len].copy_from_slice(&bytes[..len]);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No image at {}, starting from erased medium", path.display());
            }
            Err(e) => return Err(e),
        }

        Ok(Self {
            path,
            cache,
            dirty: false,
            writes: 0,
        })
    }

    /// Writes that reached the RAM cache since open.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("tmp")
    }
}

impl NvStorage for FileStorage {
    fn capacity(&self) -> usize {
        EEPROM_REGION_SIZE
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        check_bounds(offset, buf.len(), EEPROM_REGION_SIZE)?;
        buf.copy_from_slice(&self.cache[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StorageError> {
        check_bounds(offset, bytes.len(), EEPROM_REGION_SIZE)?;
        self.cache[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.dirty = true;
        self.writes += 1;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        if !self.dirty {
            return Ok(());
        }

        let temp = self.temp_path();
        fs::write(&temp, self.cache)
            .and_then(|()| fs::rename(&temp, &self.path))
            .map_err(|e| {
                error!("Committing {} failed: {}", self.path.display(), e);
                StorageError::CommitFailed {
                    details: "host file write or rename failed",
                }
            })?;

        debug!("Committed {} bytes to {}", EEPROM_REGION_SIZE, self.path.display());
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dozer_core::persistence::{DurableRecord, DurableStore};

    #[test]
    fn test_missing_file_reads_as_erased() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DurableStore::new(FileStorage::open(dir.path().join("node.bin")).unwrap());

        let record = store.load().unwrap();
        assert_eq!(record.wake_count, -1);
        assert!(record.temperature.is_nan());
    }

    #[test]
    fn test_commit_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.bin");

        let mut store = DurableStore::new(FileStorage::open(&path).unwrap());
        store.load().unwrap();
        store.store(&DurableRecord::new(0, 21.25, 3100.0)).unwrap();
        store.commit().unwrap();

        let mut reopened = DurableStore::new(FileStorage::open(&path).unwrap());
        assert_eq!(reopened.load().unwrap(), DurableRecord::new(0, 21.25, 3100.0));
        assert_eq!(fs::read(&path).unwrap().len(), EEPROM_REGION_SIZE);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_uncommitted_writes_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.bin");

        let mut store = DurableStore::new(FileStorage::open(&path).unwrap());
        store.load().unwrap();
        store.store(&DurableRecord::new(4, 20.0, 3000.0)).unwrap();
        store.commit().unwrap();

        store.set_counter(5).unwrap();
        drop(store);

        let mut reopened = DurableStore::new(FileStorage::open(&path).unwrap());
        assert_eq!(reopened.load().unwrap().wake_count, 4);
    }

    #[test]
    fn test_short_image_is_padded_with_erased_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.bin");
        fs::write(&path, 7i32.to_le_bytes()).unwrap();

        let mut store = DurableStore::new(FileStorage::open(&path).unwrap());
        let record = store.load().unwrap();

        assert_eq!(record.wake_count, 7);
        assert!(record.temperature.is_nan());
        assert!(record.battery.is_nan());
    }
}
