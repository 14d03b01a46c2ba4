//! Key handling and keystream properties of encrypted containers.

use dxport_rs::archive::{Cipher, KEYSTREAM_BLOCK_SIZE};
use dxport_rs::{ArchiveKey, ArchiveManager, ArchiveWriter, Charset, FileStream, HEADER_SIZE};
use rand::{Rng, RngCore};
use std::fs;
use tempfile::TempDir;

fn test_key() -> ArchiveKey {
    ArchiveKey::from("correct horse battery staple")
}

fn different_key() -> ArchiveKey {
    ArchiveKey::from("correct horse battery stapler")
}

fn build(dir: &TempDir, key: &ArchiveKey, files: &[(&str, Vec<u8>)]) -> String {
    let path = dir.path().join("enc.dxa");
    let mut writer = ArchiveWriter::create(&path).unwrap().with_key(key);
    for (name, data) in files {
        writer.add_file(name, data).unwrap();
    }
    writer.finalize().unwrap();
    path.to_string_lossy().into_owned()
}

fn read_entry(manager: &mut ArchiveManager, path: &str, name: &str, key: &ArchiveKey) -> Vec<u8> {
    let container = manager.ensure_indexed(path, Some(key)).unwrap();
    let location = *container.index().get(name).unwrap();
    let window = manager.open_window(path, name, Some(key)).unwrap();
    let mut stream = FileStream::from_window(window, Charset::Utf8);
    let mut buf = vec![0u8; location.length as usize];
    assert_eq!(stream.read(&mut buf).unwrap(), buf.len());
    buf
}

#[test]
fn test_encryption_roundtrip() {
    let dir = TempDir::new().unwrap();
    let key = test_key();
    let path = build(
        &dir,
        &key,
        &[
            ("test.txt", b"Secret data".to_vec()),
            ("data.bin", vec![0xAB; 1024]),
        ],
    );

    let mut manager = ArchiveManager::new();
    assert_eq!(
        manager.entry_names(&path, Some(&key)).unwrap(),
        vec!["test.txt".to_string(), "data.bin".to_string()]
    );
    assert_eq!(read_entry(&mut manager, &path, "test.txt", &key), b"Secret data");
    assert_eq!(read_entry(&mut manager, &path, "data.bin", &key), vec![0xAB; 1024]);
}

#[test]
fn test_plaintext_not_visible_on_disk() {
    let dir = TempDir::new().unwrap();
    let secret = b"the launch code is 0000".to_vec();
    let path = build(&dir, &test_key(), &[("notes/secret.txt", secret.clone())]);

    let raw = fs::read(&path).unwrap();
    assert!(!raw.windows(secret.len()).any(|w| w == secret.as_slice()));
    assert!(!raw.windows(6).any(|w| w == b"secret"));
}

#[test]
fn test_different_key_rejected() {
    let dir = TempDir::new().unwrap();
    let path = build(&dir, &test_key(), &[("a", b"alpha".to_vec())]);

    let mut manager = ArchiveManager::new();
    assert!(!manager.contains_entry(&path, "a", Some(&different_key())));
    assert!(!manager.contains_entry(&path, "a", None));
    assert!(manager.contains_entry(&path, "a", Some(&test_key())));
}

#[test]
fn test_key_on_clear_container_rejected() {
    let dir = TempDir::new().unwrap();
    let path = build(&dir, &ArchiveKey::default(), &[("a", b"alpha".to_vec())]);

    let mut manager = ArchiveManager::new();
    assert!(!manager.contains_entry(&path, "a", Some(&test_key())));
    assert!(manager.contains_entry(&path, "a", None));
}

#[test]
fn test_same_key_same_ciphertext() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let files = [("x.bin", vec![7u8; 300])];

    let a = fs::read(build(&dir_a, &test_key(), &files)).unwrap();
    let b = fs::read(build(&dir_b, &test_key(), &files)).unwrap();
    let c = fs::read(build(&TempDir::new().unwrap(), &different_key(), &files)).unwrap();

    assert_eq!(a, b);
    assert_eq!(a[..HEADER_SIZE], c[..HEADER_SIZE]);
    assert_ne!(a[HEADER_SIZE..], c[HEADER_SIZE..]);
}

#[test]
fn test_keystream_is_position_addressable() {
    let cipher = Cipher::new(&test_key()).unwrap();
    let mut rng = rand::thread_rng();

    let mut whole = vec![0u8; KEYSTREAM_BLOCK_SIZE * 5 + 13];
    rng.fill_bytes(&mut whole);
    let plain = whole.clone();
    cipher.apply(0, &mut whole);

    for _ in 0..50 {
        let start = rng.gen_range(0..plain.len());
        let end = rng.gen_range(start..=plain.len());
        let mut part = plain[start..end].to_vec();
        cipher.apply(start as u64, &mut part);
        assert_eq!(part, &whole[start..end]);

        cipher.apply(start as u64, &mut part);
        assert_eq!(part, &plain[start..end]);
    }
}

#[test]
fn test_random_payloads_roundtrip() {
    let dir = TempDir::new().unwrap();
    let mut rng = rand::thread_rng();
    let files: Vec<(String, Vec<u8>)> = (0..20)
        .map(|i| {
            let mut data = vec![0u8; rng.gen_range(0..4096)];
            rng.fill_bytes(&mut data);
            (format!("blob{:02}.bin", i), data)
        })
        .collect();
    let borrowed: Vec<(&str, Vec<u8>)> =
        files.iter().map(|(n, d)| (n.as_str(), d.clone())).collect();
    let key = test_key();
    let path = build(&dir, &key, &borrowed);

    let mut manager = ArchiveManager::new();
    for (name, data) in &files {
        assert_eq!(&read_entry(&mut manager, &path, name, &key), data);
    }

    manager.preload(&path, Some(&key)).unwrap();
    for (name, data) in &files {
        assert_eq!(&read_entry(&mut manager, &path, name, &key), data);
    }
}

#[test]
fn test_key_debug_is_redacted() {
    let key = ArchiveKey::from("hunter2");
    let shown = format!("{:?}", key);
    assert!(!shown.contains("hunter2"));
    assert_eq!(key.fingerprint().len(), 8);
    assert_ne!(key.fingerprint(), different_key().fingerprint());
}
