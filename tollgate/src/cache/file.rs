//! A configuration cache backed by a local file

use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::PathBuf,
};

use super::ConfigCache;
use crate::{error::CacheError, ConfigSnapshot};

/// A configuration cache that stores the snapshot as JSON in a local file
#[derive(Debug)]
pub struct FileConfigCache {
    path: PathBuf,
}

impl FileConfigCache {
    /// Constructs a new file cache
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The path of the cache file
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl ConfigCache for FileConfigCache {
    fn read(&self) -> Result<Option<ConfigSnapshot>, CacheError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let snapshot =
            serde_json::from_str(&data).map_err(|err| CacheError::Serialization(err.into()))?;
        Ok(Some(snapshot))
    }

    fn write(&self, snapshot: &ConfigSnapshot) -> Result<(), CacheError> {
        let data = serde_json::to_string_pretty(snapshot)
            .map_err(|err| CacheError::Serialization(err.into()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            file_opts.mode(0o600);
        }

        let mut file = file_opts.open(&self.path)?;
        file.write_all(data.as_bytes())?;
        Ok(())
    }
}
