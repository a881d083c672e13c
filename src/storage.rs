//! On-disk layout for finished downloads.
//!
//! Every download owns one directory named after its identifier:
//!
//! ```text
//! <root>/<uuid>/<title-derived-name>.<ext>
//! <root>/<uuid>/title
//! ```
//!
//! The directory holds exactly one media file next to the `title` sidecar.
//! Finished records are never updated or removed by the bot.

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Name of the sidecar file holding the display title.
pub const TITLE_FILE: &str = "title";

/// How many fresh identifiers `allocate` tries before giving up.
pub const ALLOCATE_ATTEMPTS: usize = 3;

/// Opaque, time-ordered handle naming one download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DownloadId(Uuid);

impl DownloadId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for DownloadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl FromStr for DownloadId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A finished download as read back from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub id: DownloadId,
    pub title: String,
    pub media_path: PathBuf,
    pub size: u64,
}

impl StoredRecord {
    /// Extension of the media file, e.g. `mp3`.
    pub fn extension(&self) -> &str {
        self.media_path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Opens the storage root, creating it when missing.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| Error::DirectoryCreation {
            path: root.clone(),
            source,
        })?;
        // Listed paths are absolute regardless of the working directory.
        let root = root.canonicalize()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn directory(&self, id: DownloadId) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Creates the empty directory for `id`. Fails when it already exists.
    pub fn create_directory(&self, id: DownloadId) -> Result<PathBuf> {
        let path = self.directory(id);
        fs::create_dir(&path).map_err(|source| Error::DirectoryCreation {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Allocates a fresh identifier together with its directory.
    pub fn allocate(&self) -> Result<(DownloadId, PathBuf)> {
        self.allocate_with(DownloadId::new)
    }

    /// Like [`Storage::allocate`] but draws identifiers from `next_id`.
    /// Collisions are retried with a new identifier; other filesystem errors
    /// are returned immediately.
    pub fn allocate_with(
        &self,
        mut next_id: impl FnMut() -> DownloadId,
    ) -> Result<(DownloadId, PathBuf)> {
        let mut attempt = 1;
        loop {
            let id = next_id();
            match self.create_directory(id) {
                Ok(path) => return Ok((id, path)),
                Err(Error::DirectoryCreation { path, source })
                    if source.kind() == io::ErrorKind::AlreadyExists
                        && attempt < ALLOCATE_ATTEMPTS =>
                {
                    warn!(%id, path = %path.display(), attempt, "download directory collision, retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Removes the directory of a download that never completed.
    pub fn discard(&self, id: DownloadId) -> Result<()> {
        fs::remove_dir_all(self.directory(id))?;
        Ok(())
    }

    pub fn write_title(&self, id: DownloadId, title: &str) -> Result<()> {
        let path = self.directory(id).join(TITLE_FILE);
        fs::write(&path, title)?;
        Ok(())
    }

    /// Reads back a finished download. The directory must contain the title
    /// sidecar and exactly one media file.
    pub fn read_record(&self, id: DownloadId) -> Result<StoredRecord> {
        let dir = self.directory(id);
        debug!(%id, dir = %dir.display(), "looking for data in download directory");

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(Error::not_found(id)),
            Err(err) => return Err(err.into()),
        };

        let mut media = Vec::new();
        let mut has_title = false;
        for entry in entries {
            let entry = entry?;
            if entry.file_name() == TITLE_FILE {
                has_title = true;
            } else if entry.file_type()?.is_file() {
                media.push(entry.path());
            }
        }

        let media_path = match media.len() {
            0 => return Err(Error::not_found(id)),
            1 => media.remove(0),
            n => return Err(Error::corrupt(id, format!("{n} media files present"))),
        };
        if !has_title {
            return Err(Error::corrupt(id, "title file missing"));
        }

        let title = fs::read_to_string(dir.join(TITLE_FILE))?;
        let size = fs::metadata(&media_path)?.len();
        debug!(%id, file = %media_path.display(), size, "found stored media");

        Ok(StoredRecord {
            id,
            title,
            media_path,
            size,
        })
    }

    /// Lists every stored media file. Title sidecars are not downloads and are
    /// left out.
    pub fn list_all(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(2).max_depth(2) {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() || entry.file_name() == TITLE_FILE {
                continue;
            }
            files.push(entry.into_path());
        }
        files.sort();
        Ok(files)
    }
}
