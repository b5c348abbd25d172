//! Block device I/O operations for SimpleFS

mod blockdev_trait;

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

// Re-export the block device trait and related types
pub use self::blockdev_trait::{BlockDevice, BlockDeviceError, Result, BLOCK_SIZE};

/// A block device that is backed by a file on the host filesystem.
///
/// The backing file is sized to exactly `blocks * BLOCK_SIZE` bytes when the
/// device is opened; existing content within that range is preserved, so a
/// previously formatted image survives reopening.
#[derive(Debug)]
pub struct FileBackedDisk {
    file: Mutex<Option<File>>,
    path: PathBuf,
    block_count: u32,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl FileBackedDisk {
    /// Create or open the file at `path` as a device of `blocks` blocks.
    pub fn open(path: impl AsRef<Path>, blocks: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        // Exact size; extends with zeroes or trims excess, keeps what fits.
        file.set_len(blocks as u64 * BLOCK_SIZE as u64)?;

        log::debug!("opened disk image {} ({} blocks)", path.display(), blocks);

        Ok(Self {
            file: Mutex::new(Some(file)),
            path,
            block_count: blocks,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_transfer(&self, block: u32, len: usize) -> Result<()> {
        if block >= self.block_count {
            return Err(BlockDeviceError::OutOfRange(block));
        }
        if len != BLOCK_SIZE {
            return Err(BlockDeviceError::BadBufferSize(len));
        }
        Ok(())
    }
}

impl BlockDevice for FileBackedDisk {
    fn read_block(&self, block: u32, buf: &mut [u8]) -> Result<()> {
        self.check_transfer(block, buf.len())?;

        let mut guard = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let file = guard.as_mut().ok_or(BlockDeviceError::DeviceClosed)?;

        file.seek(SeekFrom::Start(block as u64 * BLOCK_SIZE as u64))?;
        file.read_exact(buf)?;

        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_block(&self, block: u32, data: &[u8]) -> Result<()> {
        self.check_transfer(block, data.len())?;

        let mut guard = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let file = guard.as_mut().ok_or(BlockDeviceError::DeviceClosed)?;

        file.seek(SeekFrom::Start(block as u64 * BLOCK_SIZE as u64))?;
        file.write_all(data)?;

        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn block_count(&self) -> u32 {
        self.block_count
    }

    fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn sync(&self) -> Result<()> {
        let mut guard = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let file = guard.as_mut().ok_or(BlockDeviceError::DeviceClosed)?;
        file.sync_all()?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut guard = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.take() {
            Some(_) => {
                log::info!(
                    "closing disk image {}: {} reads, {} writes",
                    self.path.display(),
                    self.reads.load(Ordering::Relaxed),
                    self.writes.load(Ordering::Relaxed)
                );
                Ok(())
            }
            None => Err(BlockDeviceError::DeviceClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_block_device_operations() {
        let temp_dir = tempdir().unwrap();
        let file_path = temp_dir.path().join("test_device.bin");

        let device = FileBackedDisk::open(&file_path, 8).unwrap();

        let test_data = [0xAAu8; BLOCK_SIZE];
        device.write_block(0, &test_data).unwrap();

        let mut read_buf = [0u8; BLOCK_SIZE];
        device.read_block(0, &mut read_buf).unwrap();
        assert_eq!(test_data, read_buf);

        for i in 1..8 {
            let data = [i as u8; BLOCK_SIZE];
            device.write_block(i, &data).unwrap();

            let mut read_data = [0u8; BLOCK_SIZE];
            device.read_block(i, &mut read_data).unwrap();
            assert_eq!(data, read_data);
        }

        assert_eq!(device.reads(), 8);
        assert_eq!(device.writes(), 8);
    }

    #[test]
    fn test_block_out_of_range() {
        let temp_dir = tempdir().unwrap();
        let device = FileBackedDisk::open(temp_dir.path().join("oob.bin"), 4).unwrap();

        let mut buf = [0u8; BLOCK_SIZE];
        // One past the last block fails both ways.
        assert!(matches!(
            device.read_block(4, &mut buf),
            Err(BlockDeviceError::OutOfRange(4))
        ));
        assert!(matches!(
            device.write_block(4, &buf),
            Err(BlockDeviceError::OutOfRange(4))
        ));
        assert_eq!(device.reads(), 0);
        assert_eq!(device.writes(), 0);
    }

    #[test]
    fn test_bad_buffer_size() {
        let temp_dir = tempdir().unwrap();
        let device = FileBackedDisk::open(temp_dir.path().join("short.bin"), 4).unwrap();

        let mut short = [0u8; 512];
        assert!(matches!(
            device.read_block(0, &mut short),
            Err(BlockDeviceError::BadBufferSize(512))
        ));
        assert!(matches!(
            device.write_block(0, &short),
            Err(BlockDeviceError::BadBufferSize(512))
        ));
    }

    #[test]
    fn test_closed_device() {
        let temp_dir = tempdir().unwrap();
        let device = FileBackedDisk::open(temp_dir.path().join("closed.bin"), 4).unwrap();

        device.close().unwrap();

        let mut buf = [0u8; BLOCK_SIZE];
        assert!(matches!(
            device.read_block(0, &mut buf),
            Err(BlockDeviceError::DeviceClosed)
        ));
        assert!(matches!(
            device.close(),
            Err(BlockDeviceError::DeviceClosed)
        ));
    }

    #[test]
    fn test_reopen_preserves_content() {
        let temp_dir = tempdir().unwrap();
        let file_path = temp_dir.path().join("persist.bin");

        let data = [0x5Au8; BLOCK_SIZE];
        {
            let device = FileBackedDisk::open(&file_path, 4).unwrap();
            device.write_block(2, &data).unwrap();
            device.close().unwrap();
        }

        let device = FileBackedDisk::open(&file_path, 4).unwrap();
        let mut buf = [0u8; BLOCK_SIZE];
        device.read_block(2, &mut buf).unwrap();
        assert_eq!(buf, data);
    }
}
