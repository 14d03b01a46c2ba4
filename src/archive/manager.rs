use crate::archive::cipher::ArchiveKey;
use crate::archive::container::{Container, ContainerState, EntryWindow};
use crate::error::{DxError, Result};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, trace};

/// Normalize path to forward slashes (cross-platform compatibility)
pub(crate) fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Collapse `.`, `..` and repeated separators without touching the disk
fn lexical_normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." && !last.ends_with(':') => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Cache key for a container: the canonical path when the file exists,
/// otherwise the lexically normalized one.
pub(crate) fn container_identity(container_path: &str) -> String {
    let normalized = normalize_path(container_path);
    match fs::canonicalize(&normalized) {
        Ok(canonical) => normalize_path(&canonical.to_string_lossy()),
        Err(_) => lexical_normalize(&normalized),
    }
}

/// Map a logical path onto the container that would hold it.
///
/// `"dir/sub/name.ext"` with extension `"dxa"` becomes container
/// `"dir/sub.dxa"` and entry `"name.ext"`. Only the last directory level is
/// mapped; an empty extension leaves the directory name as is.
pub fn derive_container_path(logical_path: &str, extension: &str) -> Result<(String, String)> {
    let normalized = normalize_path(logical_path);
    let (dir, name) = normalized
        .rsplit_once('/')
        .filter(|(dir, name)| !dir.is_empty() && !name.is_empty())
        .ok_or_else(|| DxError::NoContainer(logical_path.to_string()))?;

    let container = if extension.is_empty() {
        dir.to_string()
    } else {
        format!("{}.{}", dir, extension)
    };

    Ok((container, name.to_string()))
}

/// Size and mtime of a container file, `None` when it cannot be stat'ed
type FileStamp = Option<(u64, Option<SystemTime>)>;

fn stamp(path: &str) -> FileStamp {
    fs::metadata(path)
        .ok()
        .map(|meta| (meta.len(), meta.modified().ok()))
}

/// A load that failed, remembered until the file or the key changes
#[derive(Debug)]
struct FailedLoad {
    key_fingerprint: Option<String>,
    stamp: FileStamp,
    missing: bool,
    reason: String,
}

impl FailedLoad {
    fn to_error(&self, path: &str) -> DxError {
        if self.missing {
            DxError::NotFound(path.to_string())
        } else {
            DxError::corrupt(path, self.reason.clone())
        }
    }
}

/// Cache of indexed containers keyed by canonical path
#[derive(Debug, Default)]
pub struct ArchiveManager {
    containers: HashMap<String, Arc<Container>>,
    released: HashSet<String>,
    failures: HashMap<String, FailedLoad>,
}

impl ArchiveManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `container_path` if needed and return it.
    ///
    /// The key only matters on the first successful call; an indexed
    /// container keeps the key it was parsed with. A missing or corrupt
    /// container is not re-read until its file or the key changes.
    pub fn ensure_indexed(
        &mut self,
        container_path: &str,
        key: Option<&ArchiveKey>,
    ) -> Result<Arc<Container>> {
        let path = container_identity(container_path);
        if let Some(container) = self.containers.get(&path) {
            trace!(container = %path, "container already indexed");
            return Ok(Arc::clone(container));
        }

        let key_fingerprint = key.map(ArchiveKey::fingerprint);
        let current = stamp(&path);
        if let Some(failed) = self.failures.get(&path) {
            if failed.key_fingerprint == key_fingerprint && failed.stamp == current {
                trace!(container = %path, "container known to be unusable");
                return Err(failed.to_error(&path));
            }
        }

        let container = match Container::load(&path, key) {
            Ok(container) => Arc::new(container),
            Err(err) => {
                let failed = match &err {
                    DxError::NotFound(_) => Some((true, String::new())),
                    DxError::CorruptContainer { reason, .. } => Some((false, reason.clone())),
                    _ => None,
                };
                if let Some((missing, reason)) = failed {
                    self.failures.insert(
                        path,
                        FailedLoad {
                            key_fingerprint,
                            stamp: current,
                            missing,
                            reason,
                        },
                    );
                }
                return Err(err);
            }
        };

        self.failures.remove(&path);
        self.released.remove(&path);
        self.containers.insert(path, Arc::clone(&container));
        Ok(container)
    }

    /// Load the whole container into memory. Completes before returning.
    pub fn preload(&mut self, container_path: &str, key: Option<&ArchiveKey>) -> Result<()> {
        self.ensure_indexed(container_path, key)?.preload()
    }

    /// Always true: preloading never runs in the background
    pub fn check_idle(&self, _container_path: &str) -> bool {
        true
    }

    /// Drop the index and any preloaded payload. Streams windowed into the
    /// container become stale. Returns false if nothing was loaded.
    pub fn release(&mut self, container_path: &str) -> bool {
        let path = container_identity(container_path);
        self.failures.remove(&path);
        match self.containers.remove(&path) {
            Some(_) => {
                debug!(container = %path, "released container");
                self.released.insert(path);
                true
            }
            None => false,
        }
    }

    /// Exact, case-sensitive membership test. Missing or corrupt containers
    /// contain nothing.
    pub fn contains_entry(
        &mut self,
        container_path: &str,
        entry_name: &str,
        key: Option<&ArchiveKey>,
    ) -> bool {
        match self.ensure_indexed(container_path, key) {
            Ok(container) => container.index().contains(entry_name),
            Err(err) => {
                debug!(container = container_path, error = %err, "container unavailable");
                false
            }
        }
    }

    /// Entry names in directory order
    pub fn entry_names(&mut self, container_path: &str, key: Option<&ArchiveKey>) -> Result<Vec<String>> {
        let container = self.ensure_indexed(container_path, key)?;
        Ok(container.index().names().to_vec())
    }

    pub fn state(&self, container_path: &str) -> ContainerState {
        let path = container_identity(container_path);
        match self.containers.get(&path) {
            Some(c) if c.is_preloaded() => ContainerState::Preloaded,
            Some(_) => ContainerState::Indexed,
            None if self.released.contains(&path) => ContainerState::Released,
            None => ContainerState::Unloaded,
        }
    }

    /// Open a bounded window over `entry_name`
    pub fn open_window(
        &mut self,
        container_path: &str,
        entry_name: &str,
        key: Option<&ArchiveKey>,
    ) -> Result<EntryWindow> {
        let container = self.ensure_indexed(container_path, key)?;
        let location = container
            .index()
            .get(entry_name)
            .copied()
            .ok_or_else(|| DxError::NotFound(format!("{}:{}", container.path(), entry_name)))?;
        Ok(EntryWindow::new(&container, entry_name, location))
    }

    /// Number of containers currently indexed
    pub fn loaded_count(&self) -> usize {
        self.containers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveWriter;
    use tempfile::TempDir;

    fn build(dir: &TempDir, name: &str, key: Option<&str>, files: &[(&str, &[u8])]) -> String {
        let path = dir.path().join(name);
        let mut writer = ArchiveWriter::create(&path).unwrap();
        if let Some(key) = key {
            writer = writer.with_key(&ArchiveKey::from(key));
        }
        for (entry, data) in files {
            writer.add_file(entry, data).unwrap();
        }
        writer.finalize().unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_derive_container_path() {
        assert_eq!(
            derive_container_path("dir/sub/name.ext", "xxx").unwrap(),
            ("dir/sub.xxx".to_string(), "name.ext".to_string())
        );
        assert_eq!(
            derive_container_path("assets\\title.png", "dxa").unwrap(),
            ("assets.dxa".to_string(), "title.png".to_string())
        );
        assert_eq!(
            derive_container_path("assets/title.png", "").unwrap(),
            ("assets".to_string(), "title.png".to_string())
        );
    }

    #[test]
    fn test_derive_container_path_needs_directory() {
        assert!(matches!(
            derive_container_path("title.png", "dxa"),
            Err(DxError::NoContainer(_))
        ));
        assert!(matches!(
            derive_container_path("/title.png", "dxa"),
            Err(DxError::NoContainer(_))
        ));
        assert!(matches!(
            derive_container_path("assets/", "dxa"),
            Err(DxError::NoContainer(_))
        ));
    }

    #[test]
    fn test_contains_and_state() {
        let dir = TempDir::new().unwrap();
        let path = build(&dir, "pack.dxa", None, &[("a.txt", b"alpha"), ("b.txt", b"beta")]);

        let mut manager = ArchiveManager::new();
        assert_eq!(manager.state(&path), ContainerState::Unloaded);

        assert!(manager.contains_entry(&path, "a.txt", None));
        assert!(!manager.contains_entry(&path, "A.TXT", None));
        assert_eq!(manager.state(&path), ContainerState::Indexed);

        manager.preload(&path, None).unwrap();
        assert_eq!(manager.state(&path), ContainerState::Preloaded);
        assert!(manager.check_idle(&path));

        assert!(manager.release(&path));
        assert_eq!(manager.state(&path), ContainerState::Released);
        assert!(!manager.release(&path));
    }

    #[test]
    fn test_missing_container() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope.dxa").to_string_lossy().into_owned();

        let mut manager = ArchiveManager::new();
        assert!(matches!(
            manager.ensure_indexed(&path, None),
            Err(DxError::NotFound(_))
        ));
        assert!(!manager.contains_entry(&path, "a.txt", None));
        assert_eq!(manager.loaded_count(), 0);
    }

    #[test]
    fn test_key_is_fixed_at_index_time() {
        let dir = TempDir::new().unwrap();
        let path = build(&dir, "enc.dxa", Some("k1"), &[("a.txt", b"alpha")]);

        let mut manager = ArchiveManager::new();
        let key = ArchiveKey::from("k1");
        assert!(manager.contains_entry(&path, "a.txt", Some(&key)));

        // A different key later does not re-index the cached container
        let other = ArchiveKey::from("k2");
        assert!(manager.contains_entry(&path, "a.txt", Some(&other)));

        // Once released, the wrong key no longer decrypts the directory
        manager.release(&path);
        assert!(matches!(
            manager.ensure_indexed(&path, Some(&other)),
            Err(DxError::CorruptContainer { .. })
        ));
    }

    #[test]
    fn test_entry_names_in_directory_order() {
        let dir = TempDir::new().unwrap();
        let path = build(
            &dir,
            "order.dxa",
            None,
            &[("z.bin", b"1"), ("a.bin", b"2"), ("m.bin", b"3")],
        );

        let mut manager = ArchiveManager::new();
        assert_eq!(
            manager.entry_names(&path, None).unwrap(),
            vec!["z.bin", "a.bin", "m.bin"]
        );
    }

    #[test]
    fn test_duplicate_names_first_wins() {
        let dir = TempDir::new().unwrap();
        let path = build(&dir, "dup.dxa", None, &[("x", b"first"), ("x", b"second!")]);

        let mut manager = ArchiveManager::new();
        let mut window = manager.open_window(&path, "x", None).unwrap();
        assert_eq!(window.len(), 5);

        let mut buf = [0u8; 5];
        window.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"first");
        assert_eq!(manager.entry_names(&path, None).unwrap(), vec!["x"]);
    }

    #[test]
    fn test_window_goes_stale_on_release() {
        let dir = TempDir::new().unwrap();
        let path = build(&dir, "s.dxa", None, &[("a.txt", b"alpha")]);

        let mut manager = ArchiveManager::new();
        let mut window = manager.open_window(&path, "a.txt", None).unwrap();
        assert!(!window.is_stale());

        manager.release(&path);
        assert!(window.is_stale());
        let mut buf = [0u8; 5];
        assert!(matches!(
            window.read_at(0, &mut buf),
            Err(DxError::StaleHandle(_))
        ));
    }

    #[test]
    fn test_lexical_normalize() {
        assert_eq!(lexical_normalize("a/./b//c"), "a/b/c");
        assert_eq!(lexical_normalize("a/sub/../b.dxa"), "a/b.dxa");
        assert_eq!(lexical_normalize("../x/../y"), "../y");
        assert_eq!(lexical_normalize("/../etc"), "/etc");
        assert_eq!(lexical_normalize("a/.."), ".");
        assert_eq!(lexical_normalize("C:/data/../pak.dxa"), "C:/pak.dxa");
    }

    #[test]
    fn test_aliased_paths_share_one_container() {
        let dir = TempDir::new().unwrap();
        let path = build(&dir, "assets.dxa", None, &[("a.txt", b"alpha")]);
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let alias = format!("{}/sub/.././assets.dxa", dir.path().to_string_lossy());

        let mut manager = ArchiveManager::new();
        let window = manager.open_window(&alias, "a.txt", None).unwrap();
        manager.preload(&path, None).unwrap();
        assert_eq!(manager.loaded_count(), 1);
        assert_eq!(manager.state(&alias), ContainerState::Preloaded);

        assert!(manager.release(&path));
        assert!(window.is_stale());
        assert_eq!(manager.state(&alias), ContainerState::Released);
        assert!(!manager.release(&alias));
    }

    #[test]
    fn test_missing_container_retried_once_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("late.dxa").to_string_lossy().into_owned();

        let mut manager = ArchiveManager::new();
        assert!(!manager.contains_entry(&path, "a.txt", None));
        assert!(matches!(
            manager.ensure_indexed(&path, None),
            Err(DxError::NotFound(_))
        ));

        build(&dir, "late.dxa", None, &[("a.txt", b"alpha")]);
        assert!(manager.contains_entry(&path, "a.txt", None));
    }

    #[test]
    fn test_failed_load_remembered_per_key() {
        let dir = TempDir::new().unwrap();
        let path = build(&dir, "k.dxa", Some("right"), &[("a.txt", b"alpha")]);
        let wrong = ArchiveKey::from("wrong");
        let right = ArchiveKey::from("right");

        let mut manager = ArchiveManager::new();
        assert!(manager.ensure_indexed(&path, Some(&wrong)).is_err());
        assert!(manager.failures.contains_key(&container_identity(&path)));
        assert!(matches!(
            manager.ensure_indexed(&path, Some(&wrong)),
            Err(DxError::CorruptContainer { .. })
        ));

        assert!(manager.ensure_indexed(&path, Some(&right)).is_ok());
        assert!(manager.failures.is_empty());
    }

    #[test]
    fn test_release_forgets_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.dxa").to_string_lossy().into_owned();

        let mut manager = ArchiveManager::new();
        assert!(manager.ensure_indexed(&path, None).is_err());
        assert!(!manager.release(&path));
        assert!(manager.failures.is_empty());
    }
}
