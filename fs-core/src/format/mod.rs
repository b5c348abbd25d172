//! SimpleFS on-disk format implementation
//!
//! A 4096-byte block is interpreted, depending on role, as the superblock,
//! an array of 128 inodes, an array of 1024 block pointers, or raw data.
//! All integers are stored packed in host byte order, so the codecs below
//! use [`NativeEndian`] throughout.

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

/// Magic number identifying a SimpleFS image
pub const MAGIC: u32 = 0xf0f0_3410;
/// Number of inodes per inode-table block
pub const INODES_PER_BLOCK: usize = 128;
/// Number of direct pointers per inode
pub const POINTERS_PER_INODE: usize = 5;
/// Number of pointers per indirect pointer block
pub const POINTERS_PER_BLOCK: usize = 1024;
/// Size of an on-disk inode record in bytes
pub const INODE_SIZE: usize = 32;

/// File system metadata stored in block 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    /// File system magic number
    pub magic: u32,
    /// Number of blocks in the file system
    pub blocks: u32,
    /// Number of blocks reserved for the inode table
    pub inode_blocks: u32,
    /// Number of inodes in the file system
    pub inodes: u32,
}

impl Superblock {
    /// Size of the encoded superblock in bytes; the rest of block 0 is unused.
    pub const SIZE: usize = 16;

    /// Build the superblock for a device of `blocks` blocks: 10% of the
    /// device (rounded up) is reserved for the inode table, 128 inodes per
    /// reserved block.
    pub fn for_device(blocks: u32) -> Self {
        let inode_blocks = blocks.div_ceil(10);
        Self {
            magic: MAGIC,
            blocks,
            inode_blocks,
            inodes: inode_blocks * INODES_PER_BLOCK as u32,
        }
    }

    /// Read a superblock from a reader.
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        Ok(Self {
            magic: reader.read_u32::<NativeEndian>()?,
            blocks: reader.read_u32::<NativeEndian>()?,
            inode_blocks: reader.read_u32::<NativeEndian>()?,
            inodes: reader.read_u32::<NativeEndian>()?,
        })
    }

    /// Write the superblock to a writer.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<NativeEndian>(self.magic)?;
        writer.write_u32::<NativeEndian>(self.blocks)?;
        writer.write_u32::<NativeEndian>(self.inode_blocks)?;
        writer.write_u32::<NativeEndian>(self.inodes)?;
        Ok(())
    }
}

/// On-disk inode record: one file, identified by a stable integer.
///
/// A pointer value of 0 means "no block"; block 0 is always the superblock
/// and never a legitimate target, so the sentinel is unambiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Inode {
    /// Whether the inode is in use
    pub valid: bool,
    /// Size of the file in bytes
    pub size: u32,
    /// Direct data-block pointers
    pub direct: [u32; POINTERS_PER_INODE],
    /// Indirect pointer-block index
    pub indirect: u32,
}

impl Inode {
    /// Read an inode record from a reader.
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let valid = reader.read_u32::<NativeEndian>()? != 0;
        let size = reader.read_u32::<NativeEndian>()?;
        let mut direct = [0u32; POINTERS_PER_INODE];
        for slot in direct.iter_mut() {
            *slot = reader.read_u32::<NativeEndian>()?;
        }
        let indirect = reader.read_u32::<NativeEndian>()?;
        Ok(Self {
            valid,
            size,
            direct,
            indirect,
        })
    }

    /// Write the inode record to a writer (exactly [`INODE_SIZE`] bytes).
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<NativeEndian>(self.valid as u32)?;
        writer.write_u32::<NativeEndian>(self.size)?;
        for &block in &self.direct {
            writer.write_u32::<NativeEndian>(block)?;
        }
        writer.write_u32::<NativeEndian>(self.indirect)?;
        Ok(())
    }
}

/// Decode the inode at `slot` from an inode-table block.
pub fn read_inode_slot(block: &[u8], slot: usize) -> io::Result<Inode> {
    let offset = slot * INODE_SIZE;
    let mut cursor = Cursor::new(&block[offset..offset + INODE_SIZE]);
    Inode::read_from(&mut cursor)
}

/// Encode `inode` into `slot` of an inode-table block, leaving the other 127
/// slots untouched.
pub fn write_inode_slot(block: &mut [u8], slot: usize, inode: &Inode) -> io::Result<()> {
    let offset = slot * INODE_SIZE;
    let mut cursor = Cursor::new(&mut block[offset..offset + INODE_SIZE]);
    inode.write_to(&mut cursor)
}

/// Read the pointer at `index` of an indirect pointer block.
pub fn pointer_at(block: &[u8], index: usize) -> u32 {
    debug_assert!(index < POINTERS_PER_BLOCK);
    let offset = index * 4;
    let mut cursor = Cursor::new(&block[offset..offset + 4]);
    // The slice is always 4 bytes of an in-memory block buffer.
    cursor.read_u32::<NativeEndian>().unwrap_or(0)
}

/// Store `value` at `index` of an indirect pointer block.
pub fn set_pointer_at(block: &mut [u8], index: usize, value: u32) {
    debug_assert!(index < POINTERS_PER_BLOCK);
    let offset = index * 4;
    let mut cursor = Cursor::new(&mut block[offset..offset + 4]);
    let _ = cursor.write_u32::<NativeEndian>(value);
}
