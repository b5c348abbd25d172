//! Format and mount behavior against scratch disk images.

use simplefs::prelude::*;
use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;
use tempfile::TempDir;

fn open_device(dir: &TempDir, name: &str, blocks: u32) -> Arc<dyn BlockDevice> {
    Arc::new(FileBackedDisk::open(dir.path().join(name), blocks).unwrap())
}

#[test]
fn format_and_mount_ten_block_image() {
    let dir = tempfile::tempdir().unwrap();
    let device = open_device(&dir, "image.10", 10);

    let mut fs = FileSystem::new();
    fs.format(&device).unwrap();
    fs.mount(Arc::clone(&device)).unwrap();

    let map = fs.free_map().unwrap();
    assert!(!map.is_free(0));
    assert!(!map.is_free(1));
    for block in 2..10 {
        assert!(map.is_free(block), "block {block} should be free");
    }
    assert_eq!(map.free_count(), 8);
}

#[test]
fn reserved_block_count_tracks_device_size() {
    let dir = tempfile::tempdir().unwrap();

    for blocks in [5u32, 10, 20, 21, 50] {
        let device = open_device(&dir, &format!("image.{blocks}"), blocks);
        let mut fs = FileSystem::new();
        fs.format(&device).unwrap();
        fs.mount(Arc::clone(&device)).unwrap();

        // Exactly the superblock plus ceil(blocks/10) inode blocks are taken.
        let reserved = 1 + blocks.div_ceil(10);
        let map = fs.free_map().unwrap();
        assert_eq!(map.free_count(), (blocks - reserved) as usize);
        for block in 0..reserved {
            assert!(!map.is_free(block));
        }
    }
}

#[test]
fn remount_rebuilds_identical_bitmap() {
    let dir = tempfile::tempdir().unwrap();
    let device = open_device(&dir, "image.20", 20);

    let mut fs = FileSystem::new();
    fs.format(&device).unwrap();
    fs.mount(Arc::clone(&device)).unwrap();

    // Populate enough state to exercise the indirect chain: 6 blocks spills
    // one block past the direct pointers.
    let inode = fs.create().unwrap();
    let data = vec![0xA7u8; 6 * BLOCK_SIZE];
    assert_eq!(fs.write(inode, &data, 0).unwrap(), data.len());

    let before = fs.free_map().unwrap().clone();
    fs.unmount();

    fs.mount(Arc::clone(&device)).unwrap();
    let after = fs.free_map().unwrap();
    assert_eq!(*after, before);

    // First-fit allocation on a 20-block image: direct blocks 3..=7, the
    // indirect pointer block at 8, its first pointer at 9. The rebuild must
    // pin the pointer block itself as well as the block it points at.
    for block in 3..=9 {
        assert!(!after.is_free(block), "block {block} should be in use");
    }
    for block in 10..20 {
        assert!(after.is_free(block), "block {block} should be free");
    }
}

#[test]
fn mount_rejects_corrupt_magic() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("image.bad");

    {
        let device: Arc<dyn BlockDevice> =
            Arc::new(FileBackedDisk::open(&path, 10).unwrap());
        let fs = FileSystem::new();
        fs.format(&device).unwrap();
        device.close().unwrap();
    }

    // Flip one byte of the magic number.
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    file.write_all(&[0u8]).unwrap();
    drop(file);

    let device: Arc<dyn BlockDevice> = Arc::new(FileBackedDisk::open(&path, 10).unwrap());
    let mut fs = FileSystem::new();
    assert!(matches!(
        fs.mount(device),
        Err(FsError::InvalidSuperblock)
    ));
    assert!(!fs.is_mounted());
}

#[test]
fn mount_rejects_block_count_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("image.grown");

    {
        let device: Arc<dyn BlockDevice> =
            Arc::new(FileBackedDisk::open(&path, 10).unwrap());
        let fs = FileSystem::new();
        fs.format(&device).unwrap();
        device.close().unwrap();
    }

    // Reopen the same image as a larger device; the stored block count no
    // longer matches.
    let device: Arc<dyn BlockDevice> = Arc::new(FileBackedDisk::open(&path, 12).unwrap());
    let mut fs = FileSystem::new();
    assert!(matches!(
        fs.mount(device),
        Err(FsError::InvalidSuperblock)
    ));
}
