//! Local disk units served without the peer.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::command::STATUS_LEN;
use crate::error::StorageError;

pub const DEFAULT_SECTOR_SIZE: usize = 128;

/// A source of sectors keyed by unit (1..=15) and sector number (from 1)
pub trait LocalStorage {
    fn has_unit(&self, unit: u8) -> bool;

    fn status(&mut self, unit: u8) -> Result<[u8; STATUS_LEN], StorageError>;

    fn read(&mut self, unit: u8, sector: u16) -> Result<Vec<u8>, StorageError>;

    fn write(&mut self, unit: u8, sector: u16, data: &[u8]) -> Result<(), StorageError>;

    /// Data frame length for `sector` on `unit`
    fn sector_size(&self, _unit: u8, _sector: u16) -> usize {
        DEFAULT_SECTOR_SIZE
    }

    fn is_write_protected(&self, _unit: u8) -> bool {
        false
    }
}

/// No local units at all
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStorage;

impl LocalStorage for NoStorage {
    fn has_unit(&self, _unit: u8) -> bool {
        false
    }

    fn status(&mut self, unit: u8) -> Result<[u8; STATUS_LEN], StorageError> {
        Err(StorageError::Unavailable(unit))
    }

    fn read(&mut self, unit: u8, _sector: u16) -> Result<Vec<u8>, StorageError> {
        Err(StorageError::Unavailable(unit))
    }

    fn write(&mut self, unit: u8, _sector: u16, _data: &[u8]) -> Result<(), StorageError> {
        Err(StorageError::Unavailable(unit))
    }
}

/// Flat image file: sector N lives at offset (N - 1) * sector_size.
#[derive(Debug)]
pub struct RawImage {
    file: File,
    path: PathBuf,
    sector_size: usize,
    sectors: u16,
    read_only: bool,
}

impl RawImage {
    /// Open an image read-write, falling back to read-only.
    pub fn open(path: impl AsRef<Path>, sector_size: usize) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let (file, read_only) = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => (file, false),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                (File::open(path)?, true)
            }
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata()?.len();
        let sectors = (len / sector_size as u64).min(u16::MAX as u64) as u16;
        info!(
            "storage: {} ({} sectors of {} bytes{})",
            path.display(),
            sectors,
            sector_size,
            if read_only { ", read-only" } else { "" }
        );
        Ok(RawImage {
            file,
            path: path.to_path_buf(),
            sector_size,
            sectors,
            read_only,
        })
    }

    /// Create a zero-filled image
    pub fn create(
        path: impl AsRef<Path>,
        sector_size: usize,
        sectors: u16,
    ) -> Result<Self, StorageError> {
        let file = File::create(path.as_ref())?;
        file.set_len(sector_size as u64 * sectors as u64)?;
        drop(file);
        Self::open(path, sector_size)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sectors(&self) -> u16 {
        self.sectors
    }

    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Status block reported to the bus
    pub fn status(&self) -> [u8; STATUS_LEN] {
        let mut flags = 0x10;
        if self.read_only {
            flags |= 0x08;
        }
        if self.sector_size == 256 {
            flags |= 0x20;
        }
        [flags, 0xFF, 0xE0, 0x00]
    }

    fn offset(&self, unit: u8, sector: u16) -> Result<u64, StorageError> {
        if sector == 0 || sector > self.sectors {
            return Err(StorageError::BadSector { unit, sector });
        }
        Ok((sector as u64 - 1) * self.sector_size as u64)
    }

    pub fn read_sector(&mut self, unit: u8, sector: u16) -> Result<Vec<u8>, StorageError> {
        let offset = self.offset(unit, sector)?;
        let mut buf = vec![0u8; self.sector_size];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;
        debug!("storage: unit {} read sector {}", unit, sector);
        Ok(buf)
    }

    pub fn write_sector(&mut self, unit: u8, sector: u16, data: &[u8]) -> Result<(), StorageError> {
        if self.read_only {
            return Err(StorageError::WriteProtected(unit));
        }
        if data.len() != self.sector_size {
            return Err(StorageError::SizeMismatch {
                expected: self.sector_size,
                actual: data.len(),
            });
        }
        let offset = self.offset(unit, sector)?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.file.flush()?;
        debug!("storage: unit {} wrote sector {}", unit, sector);
        Ok(())
    }
}

/// Images mounted by unit number
#[derive(Debug, Default)]
pub struct DiskSet {
    units: BTreeMap<u8, RawImage>,
}

impl DiskSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mount(&mut self, unit: u8, image: RawImage) -> Option<RawImage> {
        self.units.insert(unit, image)
    }

    pub fn unmount(&mut self, unit: u8) -> Option<RawImage> {
        self.units.remove(&unit)
    }

    pub fn units(&self) -> impl Iterator<Item = u8> + '_ {
        self.units.keys().copied()
    }

    fn image(&mut self, unit: u8) -> Result<&mut RawImage, StorageError> {
        self.units
            .get_mut(&unit)
            .ok_or(StorageError::Unavailable(unit))
    }
}

impl LocalStorage for DiskSet {
    fn has_unit(&self, unit: u8) -> bool {
        self.units.contains_key(&unit)
    }

    fn status(&mut self, unit: u8) -> Result<[u8; STATUS_LEN], StorageError> {
        Ok(self.image(unit)?.status())
    }

    fn read(&mut self, unit: u8, sector: u16) -> Result<Vec<u8>, StorageError> {
        self.image(unit)?.read_sector(unit, sector)
    }

    fn write(&mut self, unit: u8, sector: u16, data: &[u8]) -> Result<(), StorageError> {
        self.image(unit)?.write_sector(unit, sector, data)
    }

    fn sector_size(&self, unit: u8, _sector: u16) -> usize {
        self.units
            .get(&unit)
            .map_or(DEFAULT_SECTOR_SIZE, |image| image.sector_size)
    }

    fn is_write_protected(&self, unit: u8) -> bool {
        self.units.get(&unit).is_some_and(|image| image.read_only)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_sectors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        let mut image = RawImage::create(&path, 128, 720).unwrap();
        assert_eq!(image.sectors(), 720);
        assert!(!image.is_read_only());

        let data: Vec<u8> = (0..128).map(|i| i as u8).collect();
        image.write_sector(1, 3, &data).unwrap();
        assert_eq!(image.read_sector(1, 3).unwrap(), data);
        assert_eq!(image.read_sector(1, 2).unwrap(), vec![0u8; 128]);

        // Third sector starts at byte 256
        let raw = std::fs::read(&path).unwrap();
        assert_eq!(&raw[256..384], &data[..]);
    }

    #[test]
    fn test_sector_range() {
        let dir = tempfile::tempdir().unwrap();
        let mut image = RawImage::create(dir.path().join("d.img"), 128, 4).unwrap();
        assert!(matches!(
            image.read_sector(1, 0),
            Err(StorageError::BadSector { unit: 1, sector: 0 })
        ));
        assert!(matches!(
            image.read_sector(1, 5),
            Err(StorageError::BadSector { unit: 1, sector: 5 })
        ));
        assert!(image.read_sector(1, 4).is_ok());
    }

    #[test]
    fn test_write_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut image = RawImage::create(dir.path().join("d.img"), 128, 4).unwrap();
        assert!(matches!(
            image.write_sector(1, 1, &[0; 12]),
            Err(StorageError::SizeMismatch {
                expected: 128,
                actual: 12
            })
        ));
    }

    #[test]
    fn test_status_flags() {
        let dir = tempfile::tempdir().unwrap();
        let single = RawImage::create(dir.path().join("sd.img"), 128, 4).unwrap();
        assert_eq!(single.status(), [0x10, 0xFF, 0xE0, 0x00]);
        let double = RawImage::create(dir.path().join("dd.img"), 256, 4).unwrap();
        assert_eq!(double.status(), [0x30, 0xFF, 0xE0, 0x00]);
    }

    #[test]
    fn test_disk_set() {
        let dir = tempfile::tempdir().unwrap();
        let mut disks = DiskSet::new();
        disks.mount(1, RawImage::create(dir.path().join("a.img"), 128, 8).unwrap());
        disks.mount(3, RawImage::create(dir.path().join("c.img"), 256, 8).unwrap());

        assert!(disks.has_unit(1));
        assert!(!disks.has_unit(2));
        assert_eq!(disks.units().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(disks.sector_size(3, 1), 256);
        assert_eq!(disks.sector_size(2, 1), DEFAULT_SECTOR_SIZE);
        assert!(matches!(disks.status(2), Err(StorageError::Unavailable(2))));

        disks.write(3, 8, &[0x5A; 256]).unwrap();
        assert_eq!(disks.read(3, 8).unwrap(), vec![0x5A; 256]);
    }

    #[test]
    fn test_no_storage() {
        let mut storage = NoStorage;
        assert!(!storage.has_unit(1));
        assert!(matches!(storage.read(1, 1), Err(StorageError::Unavailable(1))));
    }
}
