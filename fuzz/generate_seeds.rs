//! Generate seed corpus for fuzzing

use dxport_rs::{ArchiveKey, ArchiveWriter};
use std::fs;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let corpus_dir = "fuzz/corpus/fuzz_container_parse";
    fs::create_dir_all(corpus_dir)?;

    println!("Generating seed corpus...");

    // Seed 1: Empty container
    {
        let path = format!("{}/seed_empty.dxa", corpus_dir);
        ArchiveWriter::create(&path)?.finalize()?;
        println!("✓ Generated: {}", path);
    }

    // Seed 2: Single entry in clear
    {
        let path = format!("{}/seed_single_clear.dxa", corpus_dir);
        let mut writer = ArchiveWriter::create(&path)?;
        writer.add_file("test.txt", b"Hello, World!\n")?;
        writer.finalize()?;
        println!("✓ Generated: {}", path);
    }

    // Seed 3: Several entries under the fuzz target's key
    {
        let path = format!("{}/seed_multi_encrypted.dxa", corpus_dir);
        let mut writer = ArchiveWriter::create(&path)?.with_key(&ArchiveKey::from("fuzz"));
        writer.add_file("a.txt", b"alpha\r\nbeta\n")?;
        writer.add_file("b.bin", &[0u8, 1, 2, 3, 255])?;
        writer.add_file("empty", b"")?;
        writer.finalize()?;
        println!("✓ Generated: {}", path);
    }

    // Seed 4: Larger entry spanning many keystream blocks
    {
        let path = format!("{}/seed_large.dxa", corpus_dir);
        let mut writer = ArchiveWriter::create(&path)?.with_key(&ArchiveKey::from("fuzz"));
        let data: Vec<u8> = (0..8192u32).map(|i| (i % 97) as u8).collect();
        writer.add_file("large.bin", &data)?;
        writer.finalize()?;
        println!("✓ Generated: {}", path);
    }

    println!("\n✅ Seed corpus generated in {}", corpus_dir);
    Ok(())
}
