/// Pack a directory into an encrypted container and read it back through the
/// virtual file system
///
/// Run with: cargo run --example pack_and_read
use anyhow::{ensure, Context, Result};
use dxport_rs::{ArchiveKey, ArchiveWriter, BackingKind, Priority, SeekOrigin, VirtualFileSystem};
use std::fs;

const WORK_DIR: &str = "demo_assets";
const KEY: &str = "secret";

fn main() -> Result<()> {
    println!("=== dxport-rs Pack and Read Example ===\n");

    println!("1. Packing {}/ into {}.dxa...", WORK_DIR, WORK_DIR);
    pack()?;

    println!("\n2. Reading through the virtual file system...");
    read()?;

    fs::remove_file(format!("{}.dxa", WORK_DIR)).ok();
    println!("\n✓ Example complete!");
    Ok(())
}

fn pack() -> Result<()> {
    let container = format!("{}.dxa", WORK_DIR);
    let mut writer = ArchiveWriter::create(&container)
        .with_context(|| format!("creating {}", container))?
        .with_key(&ArchiveKey::from(KEY));

    writer.add_file("title.txt", "Demo Title\r\n".as_bytes())?;
    writer.add_file("stage.txt", b"stage 3 1.25 boss\n")?;
    writer.add_file("logo.bin", &(0..=255u8).collect::<Vec<_>>())?;
    writer.finalize()?;

    println!("   ✓ Container written: {}", container);
    Ok(())
}

fn read() -> Result<()> {
    let mut vfs = VirtualFileSystem::new();
    vfs.set_use_archive(true);
    vfs.set_archive_key(KEY);
    vfs.set_archive_priority(Priority::ArchiveFirst);

    let title = vfs.open(&format!("{}/title.txt", WORK_DIR))?;
    ensure!(vfs.backing_kind(title)? == BackingKind::ArchiveEntry, "expected an archive entry");
    println!("   title.txt: {:?}", vfs.read_line(title)?);
    vfs.close(title)?;

    let stage = vfs.open(&format!("{}/stage.txt", WORK_DIR))?;
    if let Some(fields) = vfs.scan(stage, "stage %d %f %s")? {
        println!("   stage.txt: {} fields {:?}", fields.len(), fields);
    }
    vfs.close(stage)?;

    let logo = vfs.open(&format!("{}/logo.bin", WORK_DIR))?;
    println!("   logo.bin: {} bytes", vfs.size(logo)?);
    vfs.seek(logo, -4, SeekOrigin::End)?;
    println!("   last bytes: {:02x?}", vfs.read(logo, 4)?);
    ensure!(vfs.eof(logo)?, "expected end of stream");

    vfs.release_archive(&format!("{}.dxa", WORK_DIR));
    match vfs.read(logo, 1) {
        Err(err) => println!("   after release: {}", err),
        Ok(_) => println!("   after release: still readable?"),
    }
    vfs.close(logo)?;

    Ok(())
}
