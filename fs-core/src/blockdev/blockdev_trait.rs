//! Block device trait definitions for SimpleFS

use std::io;
use thiserror::Error;

/// Block size in bytes (4KB)
pub const BLOCK_SIZE: usize = 4096;

/// Error type for block device operations
#[derive(Error, Debug)]
pub enum BlockDeviceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("block {0} is out of range")]
    OutOfRange(u32),
    #[error("invalid buffer size: {0} (expected {BLOCK_SIZE})")]
    BadBufferSize(usize),
    #[error("device is closed")]
    DeviceClosed,
}

/// Result type for block device operations
pub type Result<T> = std::result::Result<T, BlockDeviceError>;

/// Trait for block device operations.
///
/// Every transfer moves exactly one whole block. Implementations enforce
/// bounds and alignment so the layers above can assume whole-block semantics.
pub trait BlockDevice: Send + Sync {
    /// Read the block at `block` into `buf` (must be exactly [`BLOCK_SIZE`] bytes).
    fn read_block(&self, block: u32, buf: &mut [u8]) -> Result<()>;

    /// Write `data` (must be exactly [`BLOCK_SIZE`] bytes) to the block at `block`.
    fn write_block(&self, block: u32, data: &[u8]) -> Result<()>;

    /// Total number of blocks in the device.
    fn block_count(&self) -> u32;

    /// Block size in bytes.
    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    /// Number of successful block reads since the device was opened.
    fn reads(&self) -> u64;

    /// Number of successful block writes since the device was opened.
    fn writes(&self) -> u64;

    /// Flush pending writes to the backing store.
    fn sync(&self) -> Result<()>;

    /// Close the device. Later operations fail with [`BlockDeviceError::DeviceClosed`].
    fn close(&self) -> Result<()>;
}
