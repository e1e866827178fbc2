//! Shared preferences kept as one JSON document per preference file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::traits::PreferenceStore;
use crate::error::{BackupError, Result};
use crate::format::{PreferenceValue, SharedPreference};

const EXTENSION: &str = "json";

type PreferenceFile = BTreeMap<String, PreferenceValue>;

/// Preference store backed by `<dir>/<file>.json` documents.
#[derive(Debug, Clone)]
pub struct JsonPreferenceStore {
    dir: PathBuf,
}

impl JsonPreferenceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read a single value.
    pub fn get(&self, file: &str, key: &str) -> Result<Option<PreferenceValue>> {
        Ok(self.read_file(file)?.remove(key))
    }

    /// Set a single value, creating the preference file if needed.
    pub fn set(&mut self, file: &str, key: &str, value: PreferenceValue) -> Result<()> {
        let mut entries = self.read_file(file)?;
        entries.insert(key.to_string(), value);
        self.write_file(file, &entries)
    }

    fn path_for(&self, file: &str) -> Result<PathBuf> {
        if file.is_empty()
            || file.contains(['/', '\\'])
            || file == "."
            || file == ".."
        {
            return Err(BackupError::InvalidInput(format!(
                "Invalid preference file name: {:?}",
                file
            )));
        }
        Ok(self.dir.join(format!("{}.{}", file, EXTENSION)))
    }

    fn read_file(&self, file: &str) -> Result<PreferenceFile> {
        let path = self.path_for(file)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PreferenceFile::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_file(&self, file: &str, entries: &PreferenceFile) -> Result<()> {
        let path = self.path_for(file)?;
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_vec_pretty(entries)?;
        crate::fs::write_atomic(&path, &json)
    }

    /// Preference file names present on disk, sorted.
    fn file_names(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

impl PreferenceStore for JsonPreferenceStore {
    fn preferences_to_backup(&self) -> Result<Vec<SharedPreference>> {
        let mut preferences = Vec::new();
        for file in self.file_names()? {
            for (key, value) in self.read_file(&file)? {
                preferences.push(SharedPreference {
                    file: file.clone(),
                    key,
                    value,
                });
            }
        }
        Ok(preferences)
    }

    fn restore(&mut self, preference: &SharedPreference) -> Result<()> {
        self.set(&preference.file, &preference.key, preference.value.clone())
    }
}
