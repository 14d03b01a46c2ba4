#![no_main]

use dxport_rs::{ArchiveKey, ArchiveManager, SeekOrigin, VirtualFileSystem, HEADER_SIZE};
use libfuzzer_sys::fuzz_target;
use std::fs;
use tempfile::TempDir;

fuzz_target!(|data: &[u8]| {
    if data.len() < HEADER_SIZE {
        return;
    }

    let dir = match TempDir::new() {
        Ok(d) => d,
        Err(_) => return,
    };
    let container = dir.path().join("fuzz.dxa");
    if fs::write(&container, data).is_err() {
        return;
    }
    let container = container.to_string_lossy().into_owned();

    // Index and preload with and without a key - must never panic
    for key in [None, Some(ArchiveKey::from("fuzz"))] {
        let mut manager = ArchiveManager::new();
        let names = match manager.entry_names(&container, key.as_ref()) {
            Ok(names) => names,
            Err(_) => continue,
        };
        let _ = manager.contains_entry(&container, "", key.as_ref());
        let _ = manager.contains_entry(&container, "../../../etc/passwd", key.as_ref());
        let _ = manager.preload(&container, key.as_ref());

        let mut vfs = VirtualFileSystem::new();
        vfs.set_use_archive(true);
        if let Some(key) = &key {
            vfs.set_archive_key(key.clone());
        }
        for name in names.iter().filter(|n| !n.contains('/')).take(16) {
            let logical = dir.path().join("fuzz").join(name);
            let Ok(h) = vfs.open(&logical.to_string_lossy()) else {
                continue;
            };
            let _ = vfs.read(h, 4096);
            let _ = vfs.seek(h, 0, SeekOrigin::Start);
            let _ = vfs.read_line(h);
            let _ = vfs.read_char(h);
            let _ = vfs.close(h);
        }
    }
});
