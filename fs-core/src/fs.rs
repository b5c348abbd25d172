//! SimpleFS file system operations
//!
//! A [`FileSystem`] handle starts out detached. [`FileSystem::mount`]
//! validates the superblock of a device, rebuilds the in-memory free-block
//! map from the on-disk pointers, and attaches the handle; every file
//! operation requires a mounted handle. The map is the allocation authority
//! between mount and unmount, the on-disk pointers are the ground truth it
//! is rebuilt from.

use std::io::{self, Cursor, Write};
use std::sync::Arc;

use thiserror::Error;

use crate::block_bitmap::FreeBlockMap;
use crate::blockdev::{BlockDevice, BlockDeviceError, BLOCK_SIZE};
use crate::format::{
    self, Inode, Superblock, INODES_PER_BLOCK, MAGIC, POINTERS_PER_BLOCK, POINTERS_PER_INODE,
};
use crate::layout::Layout;

/// Largest file in blocks: five direct pointers plus one full pointer block.
const MAX_FILE_BLOCKS: usize = POINTERS_PER_INODE + POINTERS_PER_BLOCK;

/// A SimpleFS handle, mountable on a block device.
#[derive(Default)]
pub struct FileSystem {
    mounted: Option<Mounted>,
}

struct Mounted {
    device: Arc<dyn BlockDevice>,
    superblock: Superblock,
    layout: Layout,
    free_blocks: FreeBlockMap,
}

impl FileSystem {
    /// Create a detached handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the handle is currently mounted.
    pub fn is_mounted(&self) -> bool {
        self.mounted.is_some()
    }

    /// The superblock cached at mount.
    pub fn superblock(&self) -> Option<&Superblock> {
        self.mounted.as_ref().map(|m| &m.superblock)
    }

    /// The free-block map of the mounted file system.
    pub fn free_map(&self) -> Option<&FreeBlockMap> {
        self.mounted.as_ref().map(|m| &m.free_blocks)
    }

    /// Write a fresh file system image to `device`: the superblock to
    /// block 0, zeroes everywhere else.
    ///
    /// Refuses to format the device this handle is mounted on. Other
    /// handles are not consulted; callers must never keep a stale mount
    /// across a format.
    pub fn format(&self, device: &Arc<dyn BlockDevice>) -> Result<()> {
        if let Some(m) = &self.mounted {
            if Arc::ptr_eq(&m.device, device) {
                return Err(FsError::AlreadyMounted);
            }
        }

        let sb = Superblock::for_device(device.block_count());

        let mut block = vec![0u8; BLOCK_SIZE];
        sb.write_to(&mut Cursor::new(&mut block[..]))?;
        device.write_block(0, &block)?;

        let zero = vec![0u8; BLOCK_SIZE];
        for b in 1..device.block_count() {
            device.write_block(b, &zero)?;
        }

        log::info!(
            "formatted: {} blocks, {} inode blocks, {} inodes",
            sb.blocks,
            sb.inode_blocks,
            sb.inodes
        );
        Ok(())
    }

    /// Validate the superblock of `device`, rebuild the free-block map from
    /// the on-disk pointers, and attach the handle.
    ///
    /// A failed mount leaves the handle unchanged.
    pub fn mount(&mut self, device: Arc<dyn BlockDevice>) -> Result<()> {
        if self.mounted.is_some() {
            return Err(FsError::AlreadyMounted);
        }

        let mut block = vec![0u8; BLOCK_SIZE];
        device.read_block(0, &mut block)?;
        let sb = Superblock::read_from(&mut Cursor::new(&block[..]))?;

        let expected = Superblock::for_device(device.block_count());
        if sb != expected {
            log::warn!("superblock mismatch: found {sb:?}, expected {expected:?}");
            return Err(FsError::InvalidSuperblock);
        }

        let layout = Layout::from_superblock(&sb);
        let mut free_blocks = FreeBlockMap::new(&layout);

        // Walk the inode table: every live pointer pins its block, and an
        // indirect block pins both itself and everything it points at.
        for iblock in 1..=layout.inode_blocks {
            device.read_block(iblock, &mut block)?;
            for slot in 0..INODES_PER_BLOCK {
                let inode = format::read_inode_slot(&block, slot)?;
                if !inode.valid {
                    continue;
                }

                for &b in &inode.direct {
                    if b != 0 {
                        free_blocks.mark_used(b);
                    }
                }

                if inode.indirect != 0 {
                    free_blocks.mark_used(inode.indirect);
                    if layout.contains_data_block(inode.indirect) {
                        let mut pblock = vec![0u8; BLOCK_SIZE];
                        device.read_block(inode.indirect, &mut pblock)?;
                        for index in 0..POINTERS_PER_BLOCK {
                            let p = format::pointer_at(&pblock, index);
                            if p != 0 {
                                free_blocks.mark_used(p);
                            }
                        }
                    } else {
                        log::warn!(
                            "inode {} indirect pointer {} is outside the data area",
                            (iblock - 1) * INODES_PER_BLOCK as u32 + slot as u32,
                            inode.indirect
                        );
                    }
                }
            }
        }

        log::info!(
            "mounted: {} blocks, {} free",
            layout.blocks,
            free_blocks.free_count()
        );
        self.mounted = Some(Mounted {
            device,
            superblock: sb,
            layout,
            free_blocks,
        });
        Ok(())
    }

    /// Detach the handle, dropping the free-block map and the device
    /// reference. Safe to call on a detached handle.
    pub fn unmount(&mut self) {
        if let Some(m) = self.mounted.take() {
            log::info!("unmounted {} block file system", m.layout.blocks);
        }
    }

    /// Reserve the first free slot in the inode table and return its number.
    ///
    /// The written slot is fully zeroed apart from the valid flag, so a
    /// freshly created inode is guaranteed empty even when the slot held a
    /// removed file before. No data blocks are allocated.
    pub fn create(&mut self) -> Result<u32> {
        let m = self.mounted.as_ref().ok_or(FsError::NotMounted)?;
        let device = m.device.as_ref();

        let mut block = vec![0u8; BLOCK_SIZE];
        for iblock in 1..=m.layout.inode_blocks {
            device.read_block(iblock, &mut block)?;
            for slot in 0..INODES_PER_BLOCK {
                if format::read_inode_slot(&block, slot)?.valid {
                    continue;
                }

                let fresh = Inode {
                    valid: true,
                    ..Inode::default()
                };
                format::write_inode_slot(&mut block, slot, &fresh)?;
                device.write_block(iblock, &block)?;

                let number = (iblock - 1) * INODES_PER_BLOCK as u32 + slot as u32;
                log::debug!("created inode {number}");
                return Ok(number);
            }
        }

        Err(FsError::InodeTableFull)
    }

    /// Release every data block of inode `inode_number` and clear its slot.
    ///
    /// Freed blocks only flip in the free-block map; their content is not
    /// erased.
    pub fn remove(&mut self, inode_number: u32) -> Result<()> {
        let m = self.mounted.as_mut().ok_or(FsError::NotMounted)?;
        let device = Arc::clone(&m.device);
        let device = device.as_ref();
        let layout = m.layout;

        let inode = load_inode(device, &layout, inode_number)?;

        for &block in &inode.direct {
            if block != 0 {
                m.free_blocks.release(block);
            }
        }

        if inode.indirect != 0 {
            if layout.contains_data_block(inode.indirect) {
                let mut pblock = vec![0u8; BLOCK_SIZE];
                device.read_block(inode.indirect, &mut pblock)?;
                for index in 0..POINTERS_PER_BLOCK {
                    let p = format::pointer_at(&pblock, index);
                    if p != 0 {
                        m.free_blocks.release(p);
                    }
                }
            } else {
                log::warn!(
                    "inode {inode_number} indirect pointer {} is outside the data area",
                    inode.indirect
                );
            }
            m.free_blocks.release(inode.indirect);
        }

        save_inode(device, &layout, inode_number, &Inode::default())?;
        log::debug!("removed inode {inode_number}");
        Ok(())
    }

    /// Size in bytes of inode `inode_number`.
    pub fn stat(&self, inode_number: u32) -> Result<u32> {
        let m = self.mounted.as_ref().ok_or(FsError::NotMounted)?;
        let inode = load_inode(m.device.as_ref(), &m.layout, inode_number)?;
        Ok(inode.size)
    }

    /// Read up to `buf.len()` bytes from inode `inode_number` starting at
    /// byte `offset`, returning the number of bytes copied.
    ///
    /// An offset at or past the end of the file reads 0 bytes; an empty
    /// buffer reads 0 bytes without touching the device.
    pub fn read(&self, inode_number: u32, buf: &mut [u8], offset: u64) -> Result<usize> {
        let m = self.mounted.as_ref().ok_or(FsError::NotMounted)?;
        if buf.is_empty() {
            return Ok(0);
        }

        let device = m.device.as_ref();
        let inode = load_inode(device, &m.layout, inode_number)?;
        if offset >= inode.size as u64 {
            return Ok(0);
        }

        let limit = buf.len().min((inode.size as u64 - offset) as usize);
        let mut pointer_block = None;
        let mut block = vec![0u8; BLOCK_SIZE];
        let mut copied = 0usize;

        while copied < limit {
            let pos = offset + copied as u64;
            let lb = (pos / BLOCK_SIZE as u64) as usize;
            let bo = (pos % BLOCK_SIZE as u64) as usize;

            let phys = resolve_block(device, &inode, lb, &mut pointer_block)?;
            if phys == 0 {
                if copied == 0 {
                    return Err(FsError::UnmappedBlock {
                        inode: inode_number,
                        block: lb as u32,
                    });
                }
                break;
            }

            device.read_block(phys, &mut block)?;
            let take = (limit - copied).min(BLOCK_SIZE - bo);
            buf[copied..copied + take].copy_from_slice(&block[bo..bo + take]);
            copied += take;
        }

        Ok(copied)
    }

    /// Write `data` into inode `inode_number` starting at byte `offset`,
    /// allocating blocks on demand, and return the number of bytes written.
    ///
    /// Data fills the five direct pointers first, then overflows into the
    /// indirect pointer block, which is itself allocated lazily on first
    /// use. When the device or the pointer capacity runs out the inode is
    /// persisted reflecting whatever was written and the partial count is
    /// returned. The size grows to `max(old_size, offset + written)`.
    pub fn write(&mut self, inode_number: u32, data: &[u8], offset: u64) -> Result<usize> {
        let m = self.mounted.as_mut().ok_or(FsError::NotMounted)?;
        let device = Arc::clone(&m.device);
        let device = device.as_ref();
        let layout = m.layout;

        let mut inode = load_inode(device, &layout, inode_number)?;
        if data.is_empty() {
            return Ok(0);
        }

        // In-memory copy of the indirect pointer block, loaded or created on
        // first use and flushed to disk whenever a new pointer lands in it.
        let mut pointer_block: Option<Vec<u8>> = None;
        let mut scratch = vec![0u8; BLOCK_SIZE];
        let mut written = 0usize;

        while written < data.len() {
            let pos = offset + written as u64;
            let lb = (pos / BLOCK_SIZE as u64) as usize;
            if lb >= MAX_FILE_BLOCKS {
                log::warn!("inode {inode_number} is at pointer capacity, stopping at {written} bytes");
                break;
            }
            let bo = (pos % BLOCK_SIZE as u64) as usize;

            let mut phys = resolve_block(device, &inode, lb, &mut pointer_block)?;
            let fresh = phys == 0;
            if fresh {
                if lb >= POINTERS_PER_INODE && inode.indirect == 0 {
                    let Some(ind) = m.free_blocks.allocate() else {
                        break;
                    };
                    // The zeroed pointer block reaches the disk before the
                    // inode that references it is saved.
                    scratch.fill(0);
                    device.write_block(ind, &scratch)?;
                    inode.indirect = ind;
                    pointer_block = Some(vec![0u8; BLOCK_SIZE]);
                }

                let Some(block) = m.free_blocks.allocate() else {
                    break;
                };
                phys = block;
                if lb < POINTERS_PER_INODE {
                    inode.direct[lb] = block;
                } else {
                    let pblock = pointer_block.get_or_insert_with(|| vec![0u8; BLOCK_SIZE]);
                    format::set_pointer_at(pblock, lb - POINTERS_PER_INODE, block);
                }
            }

            let take = (data.len() - written).min(BLOCK_SIZE - bo);
            if take == BLOCK_SIZE {
                device.write_block(phys, &data[written..written + BLOCK_SIZE])?;
            } else {
                if fresh {
                    // A freshly allocated block carries stale content.
                    scratch.fill(0);
                } else {
                    device.read_block(phys, &mut scratch)?;
                }
                scratch[bo..bo + take].copy_from_slice(&data[written..written + take]);
                device.write_block(phys, &scratch)?;
            }

            // Content is on disk; now persist the pointer that references it.
            if fresh && lb >= POINTERS_PER_INODE {
                if let Some(pblock) = &pointer_block {
                    device.write_block(inode.indirect, pblock)?;
                }
            }

            written += take;
        }

        if written > 0 {
            inode.size = inode.size.max((offset + written as u64) as u32);
        }
        save_inode(device, &layout, inode_number, &inode)?;

        log::debug!("wrote {written} of {} bytes to inode {inode_number}", data.len());
        Ok(written)
    }
}

/// Dump the superblock and every valid inode of an image to `out` without
/// mounting it.
pub fn debug<W: Write>(device: &dyn BlockDevice, out: &mut W) -> Result<()> {
    let mut block = vec![0u8; BLOCK_SIZE];
    device.read_block(0, &mut block)?;
    let sb = Superblock::read_from(&mut Cursor::new(&block[..]))?;

    writeln!(out, "SuperBlock:")?;
    writeln!(
        out,
        "    magic number is {}",
        if sb.magic == MAGIC { "valid" } else { "invalid" }
    )?;
    writeln!(out, "    {} blocks", sb.blocks)?;
    writeln!(out, "    {} inode blocks", sb.inode_blocks)?;
    writeln!(out, "    {} inodes", sb.inodes)?;

    let table_end = sb.inode_blocks.min(device.block_count().saturating_sub(1));
    for iblock in 1..=table_end {
        device.read_block(iblock, &mut block)?;
        for slot in 0..INODES_PER_BLOCK {
            let inode = format::read_inode_slot(&block, slot)?;
            if !inode.valid {
                continue;
            }

            let number = (iblock - 1) * INODES_PER_BLOCK as u32 + slot as u32;
            writeln!(out, "Inode {number}:")?;
            writeln!(out, "    size: {} bytes", inode.size)?;

            write!(out, "    direct blocks:")?;
            for &b in inode.direct.iter().filter(|&&b| b != 0) {
                write!(out, " {b}")?;
            }
            writeln!(out)?;

            if inode.indirect != 0 {
                writeln!(out, "    indirect block: {}", inode.indirect)?;
                write!(out, "    indirect data blocks:")?;
                if inode.indirect < device.block_count() {
                    let mut pblock = vec![0u8; BLOCK_SIZE];
                    device.read_block(inode.indirect, &mut pblock)?;
                    for index in 0..POINTERS_PER_BLOCK {
                        let p = format::pointer_at(&pblock, index);
                        if p != 0 {
                            write!(out, " {p}")?;
                        }
                    }
                }
                writeln!(out)?;
            }
        }
    }

    Ok(())
}

/// Map logical file block `lb` to a physical block index through the
/// direct-then-indirect pointers. Returns 0 when no block backs `lb`;
/// `pointer_block` caches the indirect block across calls.
fn resolve_block(
    device: &dyn BlockDevice,
    inode: &Inode,
    lb: usize,
    pointer_block: &mut Option<Vec<u8>>,
) -> Result<u32> {
    if lb < POINTERS_PER_INODE {
        return Ok(inode.direct[lb]);
    }
    if lb >= MAX_FILE_BLOCKS || inode.indirect == 0 {
        return Ok(0);
    }

    if pointer_block.is_none() {
        let mut buf = vec![0u8; BLOCK_SIZE];
        device.read_block(inode.indirect, &mut buf)?;
        *pointer_block = Some(buf);
    }
    Ok(pointer_block
        .as_deref()
        .map(|pblock| format::pointer_at(pblock, lb - POINTERS_PER_INODE))
        .unwrap_or(0))
}

fn load_inode(device: &dyn BlockDevice, layout: &Layout, n: u32) -> Result<Inode> {
    let (block, slot) = layout
        .inode_location(n)
        .ok_or(FsError::BadInodeNumber(n))?;

    let mut buf = vec![0u8; BLOCK_SIZE];
    device.read_block(block, &mut buf)?;

    let inode = format::read_inode_slot(&buf, slot)?;
    if !inode.valid {
        return Err(FsError::InodeNotInUse(n));
    }
    Ok(inode)
}

// Read-modify-write so the other 127 inodes in the block survive.
fn save_inode(device: &dyn BlockDevice, layout: &Layout, n: u32, inode: &Inode) -> Result<()> {
    let (block, slot) = layout
        .inode_location(n)
        .ok_or(FsError::BadInodeNumber(n))?;

    let mut buf = vec![0u8; BLOCK_SIZE];
    device.read_block(block, &mut buf)?;
    format::write_inode_slot(&mut buf, slot, inode)?;
    device.write_block(block, &buf)?;
    Ok(())
}

/// File system error type
#[derive(Error, Debug)]
pub enum FsError {
    #[error("device error: {0}")]
    Device(#[from] BlockDeviceError),
    #[error("not a valid file system image")]
    InvalidSuperblock,
    #[error("inode {0} is out of range")]
    BadInodeNumber(u32),
    #[error("inode {0} is not in use")]
    InodeNotInUse(u32),
    #[error("inode table is full")]
    InodeTableFull,
    #[error("inode {inode} has no data block for file block {block}")]
    UnmappedBlock {
        /// Inode whose traversal came up empty
        inode: u32,
        /// Logical file block with no backing pointer
        block: u32,
    },
    #[error("file system is not mounted")]
    NotMounted,
    #[error("file system is already mounted")]
    AlreadyMounted,
}

impl From<io::Error> for FsError {
    fn from(err: io::Error) -> Self {
        FsError::Device(BlockDeviceError::Io(err))
    }
}

/// File system result type
pub type Result<T> = std::result::Result<T, FsError>;
