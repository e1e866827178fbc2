//! Profile avatar files, one per recipient.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{BackupError, Result};

/// An avatar file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarFile {
    /// File name, which is the recipient id for current avatars
    pub name: String,
    pub recipient_id: Option<String>,
    pub length: u64,
    pub path: PathBuf,
}

/// Directory of avatar files named by recipient id.
#[derive(Debug, Clone)]
pub struct AvatarStore {
    dir: PathBuf,
}

impl AvatarStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Every avatar, sorted by name. A missing directory has none.
    pub fn list(&self) -> Result<Vec<AvatarFile>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut avatars = Vec::new();
        for entry in entries {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::warn!(path = %entry.path().display(), "Skipping avatar with non UTF-8 name");
                continue;
            };
            if is_staged_name(&name) {
                continue;
            }
            avatars.push(AvatarFile {
                recipient_id: Some(name.clone()),
                name,
                length: meta.len(),
                path: entry.path(),
            });
        }
        avatars.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(avatars)
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.list()?.len() as u64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn open(&self, name: &str) -> Result<File> {
        Ok(File::open(self.path_for(name)?)?)
    }

    /// Create (or truncate) the avatar for `name`.
    pub fn create(&self, name: &str) -> Result<(PathBuf, File)> {
        let path = self.path_for(name)?;
        fs::create_dir_all(&self.dir)?;
        let file = File::create(&path)?;
        Ok((path, file))
    }

    /// A temp file beside the avatar for `name`. Nothing replaces the avatar
    /// until the file is passed to [`install`](Self::install).
    pub fn stage(&self, name: &str) -> Result<(PathBuf, File)> {
        let path = self.path_for(name)?;
        fs::create_dir_all(&self.dir)?;
        crate::fs::create_temp_beside(&path)
    }

    /// Move a file from [`stage`](Self::stage) into place as the avatar for `name`.
    pub fn install(&self, staged: &Path, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        crate::fs::rename_with_fallback(staged, &path)?;
        Ok(())
    }

    /// Delete a staged file that will not be installed.
    pub fn discard(&self, staged: &Path) -> Result<()> {
        match fs::remove_file(staged) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete an avatar; deleting a missing avatar is not an error.
    pub fn remove(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.path_for(name)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(BackupError::InvalidInput(format!(
                "Invalid avatar name: {:?}",
                name
            )));
        }
        Ok(self.dir.join(name))
    }
}

/// Temp files from [`AvatarStore::stage`] are hidden and end in `.tmp`.
fn is_staged_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".tmp")
}
