//! On-disk session store.
//!
//! Each namespace lives in `<directory>/<namespace>.json`. Every write goes
//! to its own uniquely named temporary file in the same directory and is then
//! renamed into place, so readers see either the previous namespace or the
//! new one, never a partial write.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::cache::{SessionStore, StoreError};

const NAMESPACE_EXTENSION: &str = "json";
const STAGING_SUFFIX: &str = ".json.tmp";
const STAGING_EXTENSION: &str = "tmp";

#[derive(Debug, Clone)]
pub struct FileStore {
    directory: PathBuf,
}

impl FileStore {
    /// Opens (creating if needed) the session directory.
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, namespace: &str) -> Result<PathBuf, StoreError> {
        validate_namespace(namespace)?;
        Ok(self
            .directory
            .join(format!("{namespace}.{NAMESPACE_EXTENSION}")))
    }
}

fn validate_namespace(namespace: &str) -> Result<(), StoreError> {
    let valid = !namespace.is_empty()
        && namespace
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidNamespace(namespace.to_string()))
    }
}

impl SessionStore for FileStore {
    fn get_item(&self, namespace: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(namespace)?;
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set_item(&self, namespace: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(namespace)?;
        let mut staging = tempfile::Builder::new()
            .prefix(&format!(".{namespace}."))
            .suffix(STAGING_SUFFIX)
            .tempfile_in(&self.directory)?;
        staging.write_all(value.as_bytes())?;
        staging.flush()?;
        staging.persist(&path).map_err(|err| err.error)?;
        Ok(())
    }

    fn remove_item(&self, namespace: &str) -> Result<(), StoreError> {
        let path = self.path_for(namespace)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn clear(&self) -> Result<(), StoreError> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let mut removed = 0_usize;
        for entry in entries {
            let path = entry?.path();
            let is_namespace = path
                .extension()
                .is_some_and(|ext| ext == NAMESPACE_EXTENSION || ext == STAGING_EXTENSION);
            if is_namespace && path.is_file() {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        debug!(directory = %self.directory.display(), removed, "Session directory cleared");
        Ok(())
    }
}
