//! Interactive command loop for the SimpleFS shell

use anyhow::Result;
use simplefs::{debug, BlockDevice, FileSystem};
use std::fs::File;
use std::io::{self, BufRead, Read, Write};
use std::path::Path;
use std::sync::Arc;

/// Chunk size for streaming copyin/copyout.
const COPY_CHUNK: usize = 16 * 1024;

/// Run the command loop until end of input or an explicit exit.
pub fn run(device: Arc<dyn BlockDevice>) -> Result<()> {
    let mut fs = FileSystem::new();
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        eprint!("sfs> ");
        io::stderr().flush()?;

        let Some(line) = lines.next() else { break };
        let line = line?;
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some(&cmd) = words.first() else { continue };

        match cmd {
            "format" => do_format(&fs, &device, &words),
            "mount" => do_mount(&mut fs, &device, &words),
            "debug" => do_debug(device.as_ref(), &words),
            "create" => do_create(&mut fs, &words),
            "remove" => do_remove(&mut fs, &words),
            "stat" => do_stat(&fs, &words),
            "cat" => do_cat(&fs, &words),
            "copyout" => do_copyout(&fs, &words),
            "copyin" => do_copyin(&mut fs, &words),
            "help" => do_help(),
            "exit" | "quit" => break,
            _ => {
                println!("Unknown command: {line}");
                println!("Type 'help' for a list of commands.");
            }
        }
    }

    fs.unmount();
    if let Err(err) = device.sync() {
        log::warn!("sync failed: {err}");
    }
    if let Err(err) = device.close() {
        log::warn!("close failed: {err}");
    }
    Ok(())
}

fn parse_inode(arg: &str) -> Option<u32> {
    match arg.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            println!("Invalid inode number: {arg}");
            None
        }
    }
}

fn do_format(fs: &FileSystem, device: &Arc<dyn BlockDevice>, words: &[&str]) {
    if words.len() != 1 {
        println!("Usage: format");
        return;
    }

    match fs.format(device) {
        Ok(()) => println!("disk formatted."),
        Err(err) => println!("format failed: {err}"),
    }
}

fn do_mount(fs: &mut FileSystem, device: &Arc<dyn BlockDevice>, words: &[&str]) {
    if words.len() != 1 {
        println!("Usage: mount");
        return;
    }

    match fs.mount(Arc::clone(device)) {
        Ok(()) => println!("disk mounted."),
        Err(err) => println!("mount failed: {err}"),
    }
}

fn do_debug(device: &dyn BlockDevice, words: &[&str]) {
    if words.len() != 1 {
        println!("Usage: debug");
        return;
    }

    let stdout = io::stdout();
    if let Err(err) = debug(device, &mut stdout.lock()) {
        println!("debug failed: {err}");
    }
}

fn do_create(fs: &mut FileSystem, words: &[&str]) {
    if words.len() != 1 {
        println!("Usage: create");
        return;
    }

    match fs.create() {
        Ok(inode) => println!("created inode {inode}."),
        Err(err) => println!("create failed: {err}"),
    }
}

fn do_remove(fs: &mut FileSystem, words: &[&str]) {
    if words.len() != 2 {
        println!("Usage: remove <inode>");
        return;
    }
    let Some(inode) = parse_inode(words[1]) else {
        return;
    };

    match fs.remove(inode) {
        Ok(()) => println!("removed inode {inode}."),
        Err(err) => println!("remove failed: {err}"),
    }
}

fn do_stat(fs: &FileSystem, words: &[&str]) {
    if words.len() != 2 {
        println!("Usage: stat <inode>");
        return;
    }
    let Some(inode) = parse_inode(words[1]) else {
        return;
    };

    match fs.stat(inode) {
        Ok(bytes) => println!("inode {inode} has size {bytes} bytes."),
        Err(err) => println!("stat failed: {err}"),
    }
}

fn do_cat(fs: &FileSystem, words: &[&str]) {
    if words.len() != 2 {
        println!("Usage: cat <inode>");
        return;
    }
    let Some(inode) = parse_inode(words[1]) else {
        return;
    };

    let stdout = io::stdout();
    if let Err(err) = stream_out(fs, inode, &mut stdout.lock(), false) {
        println!("cat failed: {err}");
    }
}

fn do_copyout(fs: &FileSystem, words: &[&str]) {
    if words.len() != 3 {
        println!("Usage: copyout <inode> <file>");
        return;
    }
    let Some(inode) = parse_inode(words[1]) else {
        return;
    };

    if let Err(err) = copyout(fs, inode, Path::new(words[2])) {
        println!("copyout failed: {err}");
    }
}

fn do_copyin(fs: &mut FileSystem, words: &[&str]) {
    if words.len() != 3 {
        println!("Usage: copyin <file> <inode>");
        return;
    }
    let Some(inode) = parse_inode(words[2]) else {
        return;
    };

    if let Err(err) = copyin(fs, Path::new(words[1]), inode) {
        println!("copyin failed: {err}");
    }
}

fn do_help() {
    println!("Commands are:");
    println!("    format");
    println!("    mount");
    println!("    debug");
    println!("    create");
    println!("    remove  <inode>");
    println!("    cat     <inode>");
    println!("    stat    <inode>");
    println!("    copyin  <file> <inode>");
    println!("    copyout <inode> <file>");
    println!("    help");
    println!("    quit");
    println!("    exit");
}

/// Stream a host file into an inode, writing from offset 0.
fn copyin(fs: &mut FileSystem, path: &Path, inode: u32) -> Result<()> {
    let mut stream = File::open(path)?;

    let mut buffer = vec![0u8; COPY_CHUNK];
    let mut offset = 0u64;
    loop {
        let read = stream.read(&mut buffer)?;
        if read == 0 {
            break;
        }

        let written = fs.write(inode, &buffer[..read], offset)?;
        offset += written as u64;
        if written != read {
            eprintln!("short write: {written} of {read} bytes");
            break;
        }
    }

    println!("{offset} bytes copied");
    Ok(())
}

/// Stream an inode's bytes to a host file.
fn copyout(fs: &FileSystem, inode: u32, path: &Path) -> Result<()> {
    let mut stream = File::create(path)?;
    stream_out(fs, inode, &mut stream, true)
}

fn stream_out<W: Write>(fs: &FileSystem, inode: u32, out: &mut W, report: bool) -> Result<()> {
    let mut buffer = vec![0u8; COPY_CHUNK];
    let mut offset = 0u64;
    loop {
        let read = fs.read(inode, &mut buffer, offset)?;
        if read == 0 {
            break;
        }
        out.write_all(&buffer[..read])?;
        offset += read as u64;
    }
    out.flush()?;

    if report {
        println!("{offset} bytes copied");
    }
    Ok(())
}
