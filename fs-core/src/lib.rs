//! SimpleFS Core - an educational inode-based block file system
//!
//! This crate persists files inside a single host file treated as a
//! fixed-size block device. The surface is deliberately small: format,
//! mount, unmount, create, remove, stat, read, write, and an unmounted
//! debug walker, all operating over integer inode handles. There is no
//! directory tree and no file names.
//!
//! Block 0 holds the superblock, 10% of the device (rounded up) holds the
//! inode table, and the rest is the data area reached through five direct
//! pointers plus one indirect pointer block per inode. Allocation state
//! lives in an in-memory free-block map rebuilt from the on-disk pointers
//! at every mount.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(rust_2018_idioms)]

// Core modules
pub mod block_bitmap;
pub mod blockdev;
pub mod format;
pub mod fs;
pub mod layout;

// Re-export block device types
pub use blockdev::{BlockDevice, BlockDeviceError, FileBackedDisk, BLOCK_SIZE};

// Re-export the file system types
pub use fs::{debug, FileSystem, FsError};

/// Block device result type
pub type BlockResult<T> = std::result::Result<T, BlockDeviceError>;

/// Re-export common types and traits
pub mod prelude {
    pub use crate::block_bitmap::FreeBlockMap;
    pub use crate::format::{Inode, Superblock};
    pub use crate::fs::{debug, FileSystem, FsError, Result};
    pub use crate::layout::Layout;
    pub use crate::BlockDevice;
    pub use crate::BlockDeviceError;
    pub use crate::BlockResult;
    pub use crate::FileBackedDisk;
    pub use crate::BLOCK_SIZE;
}
