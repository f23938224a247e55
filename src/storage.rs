// 🗂️ Document storage - the four folder roles behind one injectable interface
//
// The lifecycle manager and the importer only talk to `DocumentStore`.
// `FsStore` maps roles to real directories, `MemoryStore` keeps everything
// in maps so whole runs can be tested without touching the disk.

use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

// ============================================================================
// FOLDER ROLES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FolderRole {
    /// Operator drops receipts here; never modified by the system
    Incoming,
    /// Work-in-progress mirror, cleared at the start of every scan
    Scanned,
    /// Persistent, append-only, sequentially named
    Imported,
    /// Persistent, overwritten on retry, one `.log` per failed file
    Failed,
}

impl FolderRole {
    pub const ALL: [FolderRole; 4] = [
        FolderRole::Incoming,
        FolderRole::Scanned,
        FolderRole::Imported,
        FolderRole::Failed,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FolderRole::Incoming => "incoming",
            FolderRole::Scanned => "scanned",
            FolderRole::Imported => "imported",
            FolderRole::Failed => "failed",
        }
    }
}

impl fmt::Display for FolderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// STORE TRAIT
// ============================================================================

pub trait DocumentStore {
    /// Create the folder if missing. Idempotent.
    fn ensure_folder(&mut self, role: FolderRole) -> Result<(), StorageError>;

    /// Regular, non-hidden file names in byte-wise sorted order
    fn list(&self, role: FolderRole) -> Result<Vec<String>, StorageError>;

    fn read(&self, role: FolderRole, name: &str) -> Result<Vec<u8>, StorageError>;

    /// Create or overwrite
    fn write(&mut self, role: FolderRole, name: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Move a file between folders. Fails if the target already exists.
    fn rename(
        &mut self,
        from: FolderRole,
        name: &str,
        to: FolderRole,
        new_name: &str,
    ) -> Result<(), StorageError>;

    fn remove(&mut self, role: FolderRole, name: &str) -> Result<(), StorageError>;

    /// Delete every entry in the folder, keeping the folder itself
    fn clear(&mut self, role: FolderRole) -> Result<(), StorageError>;

    fn exists(&self, role: FolderRole, name: &str) -> bool;

    /// Human-readable location for messages
    fn location(&self, role: FolderRole, name: &str) -> String;

    /// Copy keeping the source in place. Default goes through read + write.
    fn copy(
        &mut self,
        from: FolderRole,
        name: &str,
        to: FolderRole,
        new_name: &str,
    ) -> Result<(), StorageError> {
        let bytes = self.read(from, name)?;
        self.write(to, new_name, &bytes)
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

// ============================================================================
// FILESYSTEM STORE
// ============================================================================

/// Directory for each folder role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderLayout {
    pub incoming: PathBuf,
    pub scanned: PathBuf,
    pub imported: PathBuf,
    pub failed: PathBuf,
}

impl FolderLayout {
    /// Conventional `incoming/ scanned/ imported/ failed/` under one root
    pub fn under(root: &Path) -> Self {
        FolderLayout {
            incoming: root.join(FolderRole::Incoming.name()),
            scanned: root.join(FolderRole::Scanned.name()),
            imported: root.join(FolderRole::Imported.name()),
            failed: root.join(FolderRole::Failed.name()),
        }
    }

    pub fn dir(&self, role: FolderRole) -> &Path {
        match role {
            FolderRole::Incoming => &self.incoming,
            FolderRole::Scanned => &self.scanned,
            FolderRole::Imported => &self.imported,
            FolderRole::Failed => &self.failed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FsStore {
    layout: FolderLayout,
}

impl FsStore {
    pub fn new(layout: FolderLayout) -> Self {
        FsStore { layout }
    }

    pub fn layout(&self) -> &FolderLayout {
        &self.layout
    }

    pub fn path(&self, role: FolderRole, name: &str) -> PathBuf {
        self.layout.dir(role).join(name)
    }

    fn dir_display(&self, role: FolderRole) -> String {
        self.layout.dir(role).display().to_string()
    }
}

#[cfg(unix)]
const CROSS_DEVICE_ERROR: i32 = 18; // EXDEV
#[cfg(windows)]
const CROSS_DEVICE_ERROR: i32 = 17; // ERROR_NOT_SAME_DEVICE
#[cfg(not(any(unix, windows)))]
const CROSS_DEVICE_ERROR: i32 = -1;

fn is_cross_device(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(CROSS_DEVICE_ERROR)
}

impl DocumentStore for FsStore {
    fn ensure_folder(&mut self, role: FolderRole) -> Result<(), StorageError> {
        let dir = self.layout.dir(role);
        fs::create_dir_all(dir).map_err(|e| StorageError::io("create folder", self.dir_display(role), e))
    }

    fn list(&self, role: FolderRole) -> Result<Vec<String>, StorageError> {
        let dir = self.layout.dir(role);
        let entries = fs::read_dir(dir).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound {
                location: self.dir_display(role),
            },
            _ => StorageError::io("list folder", self.dir_display(role), e),
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io("list folder", self.dir_display(role), e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| StorageError::io("inspect entry", entry.path().display().to_string(), e))?;
            if !file_type.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if !is_hidden(&name) {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }

    fn read(&self, role: FolderRole, name: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path(role, name);
        fs::read(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StorageError::NotFound {
                location: path.display().to_string(),
            },
            _ => StorageError::io("read", path.display().to_string(), e),
        })
    }

    fn write(&mut self, role: FolderRole, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path(role, name);
        fs::write(&path, bytes).map_err(|e| StorageError::io("write", path.display().to_string(), e))
    }

    fn rename(
        &mut self,
        from: FolderRole,
        name: &str,
        to: FolderRole,
        new_name: &str,
    ) -> Result<(), StorageError> {
        let source = self.path(from, name);
        let target = self.path(to, new_name);

        if !source.is_file() {
            return Err(StorageError::NotFound {
                location: source.display().to_string(),
            });
        }
        if target.exists() {
            return Err(StorageError::AlreadyExists {
                location: target.display().to_string(),
            });
        }

        match fs::rename(&source, &target) {
            Ok(()) => Ok(()),
            // Folders on different devices: copy then delete
            Err(e) if is_cross_device(&e) => {
                if let Err(e) = fs::copy(&source, &target) {
                    let _ = fs::remove_file(&target);
                    return Err(StorageError::io("move", target.display().to_string(), e));
                }
                if let Err(e) = fs::remove_file(&source) {
                    // Never leave the file in both folders
                    let _ = fs::remove_file(&target);
                    return Err(StorageError::io("move", source.display().to_string(), e));
                }
                Ok(())
            }
            Err(e) => Err(StorageError::io("move", source.display().to_string(), e)),
        }
    }

    fn remove(&mut self, role: FolderRole, name: &str) -> Result<(), StorageError> {
        let path = self.path(role, name);
        fs::remove_file(&path).map_err(|e| StorageError::io("remove", path.display().to_string(), e))
    }

    fn clear(&mut self, role: FolderRole) -> Result<(), StorageError> {
        let dir = self.layout.dir(role);
        let entries = fs::read_dir(dir).map_err(|e| StorageError::io("clear folder", self.dir_display(role), e))?;

        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io("clear folder", self.dir_display(role), e))?;
            let path = entry.path();
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            result.map_err(|e| StorageError::io("clear folder", path.display().to_string(), e))?;
        }

        Ok(())
    }

    fn exists(&self, role: FolderRole, name: &str) -> bool {
        self.path(role, name).is_file()
    }

    fn location(&self, role: FolderRole, name: &str) -> String {
        self.path(role, name).display().to_string()
    }

    fn copy(
        &mut self,
        from: FolderRole,
        name: &str,
        to: FolderRole,
        new_name: &str,
    ) -> Result<(), StorageError> {
        let source = self.path(from, name);
        let target = self.path(to, new_name);
        fs::copy(&source, &target)
            .map(|_| ())
            .map_err(|e| StorageError::io("copy", target.display().to_string(), e))
    }
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// Map-backed store with fault injection for tests
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    folders: BTreeMap<FolderRole, BTreeMap<String, Vec<u8>>>,
    unreadable: HashSet<(FolderRole, String)>,
    failing_targets: HashSet<(FolderRole, String)>,
    locked_folders: HashSet<FolderRole>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with all four folders already present
    pub fn with_folders() -> Self {
        let mut store = Self::new();
        for role in FolderRole::ALL {
            store.folders.insert(role, BTreeMap::new());
        }
        store
    }

    /// Seed a file, creating the folder if needed
    pub fn put(&mut self, role: FolderRole, name: &str, bytes: &[u8]) {
        self.folders
            .entry(role)
            .or_default()
            .insert(name.to_string(), bytes.to_vec());
    }

    pub fn get(&self, role: FolderRole, name: &str) -> Option<&[u8]> {
        self.folders
            .get(&role)
            .and_then(|files| files.get(name))
            .map(|bytes| bytes.as_slice())
    }

    pub fn names(&self, role: FolderRole) -> Vec<String> {
        self.folders
            .get(&role)
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Reads of this file fail with an I/O error
    pub fn make_unreadable(&mut self, role: FolderRole, name: &str) {
        self.unreadable.insert((role, name.to_string()));
    }

    /// Writes or moves that would create this file fail
    pub fn fail_writes_to(&mut self, role: FolderRole, name: &str) {
        self.failing_targets.insert((role, name.to_string()));
    }

    /// Folder creation fails, as with a permission problem
    pub fn deny_folder(&mut self, role: FolderRole) {
        self.locked_folders.insert(role);
    }

    fn injected(location: String) -> StorageError {
        StorageError::io(
            "simulated",
            location,
            std::io::Error::new(ErrorKind::PermissionDenied, "injected failure"),
        )
    }

    fn folder(&self, role: FolderRole) -> Result<&BTreeMap<String, Vec<u8>>, StorageError> {
        self.folders.get(&role).ok_or_else(|| StorageError::NotFound {
            location: format!("memory://{}", role),
        })
    }

    fn folder_mut(&mut self, role: FolderRole) -> Result<&mut BTreeMap<String, Vec<u8>>, StorageError> {
        self.folders.get_mut(&role).ok_or_else(|| StorageError::NotFound {
            location: format!("memory://{}", role),
        })
    }

    fn check_target(&self, role: FolderRole, name: &str) -> Result<(), StorageError> {
        if self.failing_targets.contains(&(role, name.to_string())) {
            return Err(Self::injected(self.location(role, name)));
        }
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    fn ensure_folder(&mut self, role: FolderRole) -> Result<(), StorageError> {
        if self.locked_folders.contains(&role) {
            return Err(Self::injected(format!("memory://{}", role)));
        }
        self.folders.entry(role).or_default();
        Ok(())
    }

    fn list(&self, role: FolderRole) -> Result<Vec<String>, StorageError> {
        Ok(self
            .folder(role)?
            .keys()
            .filter(|name| !is_hidden(name))
            .cloned()
            .collect())
    }

    fn read(&self, role: FolderRole, name: &str) -> Result<Vec<u8>, StorageError> {
        if self.unreadable.contains(&(role, name.to_string())) {
            return Err(Self::injected(self.location(role, name)));
        }
        self.folder(role)?
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                location: self.location(role, name),
            })
    }

    fn write(&mut self, role: FolderRole, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.check_target(role, name)?;
        self.folder_mut(role)?.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn rename(
        &mut self,
        from: FolderRole,
        name: &str,
        to: FolderRole,
        new_name: &str,
    ) -> Result<(), StorageError> {
        self.check_target(to, new_name)?;
        if self.folder(to)?.contains_key(new_name) {
            return Err(StorageError::AlreadyExists {
                location: self.location(to, new_name),
            });
        }

        let location = self.location(from, name);
        let bytes = self
            .folder_mut(from)?
            .remove(name)
            .ok_or(StorageError::NotFound { location })?;
        self.folder_mut(to)?.insert(new_name.to_string(), bytes);
        Ok(())
    }

    fn remove(&mut self, role: FolderRole, name: &str) -> Result<(), StorageError> {
        let location = self.location(role, name);
        self.folder_mut(role)?
            .remove(name)
            .map(|_| ())
            .ok_or(StorageError::NotFound { location })
    }

    fn clear(&mut self, role: FolderRole) -> Result<(), StorageError> {
        self.folder_mut(role)?.clear();
        Ok(())
    }

    fn exists(&self, role: FolderRole, name: &str) -> bool {
        self.get(role, name).is_some()
    }

    fn location(&self, role: FolderRole, name: &str) -> String {
        format!("memory://{}/{}", role, name)
    }
}

// ============================================================================
// TESTS
// ============================================================================
