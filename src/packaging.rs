//! Single-entry ZIP packaging for the "zip" delivery option.
//!
//! The archive is written into an anonymous temporary file so large media
//! never has to sit in memory; the caller gets back a rewound handle it can
//! stream from.

use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom, Write},
    path::PathBuf,
};

use zip::{CompressionMethod, ZipWriter, write::FileOptions};

use crate::error::{Error, Result};

/// Writes `source` as the only entry of a ZIP archive into `sink` and returns
/// the finished sink. Audio is already compressed, so the entry is stored.
pub fn wrap_single_file<R, W>(entry_name: &str, mut source: R, sink: W) -> Result<W>
where
    R: Read,
    W: Write + Seek,
{
    let mut writer = ZipWriter::new(sink);
    let options = FileOptions::default().compression_method(CompressionMethod::Stored);
    writer.start_file(entry_name, options)?;
    io::copy(&mut source, &mut writer)?;
    Ok(writer.finish()?)
}

/// Packages the file at `path` into a temporary archive and returns it ready
/// to be read from the start.
pub async fn package_file(entry_name: String, path: PathBuf) -> Result<tokio::fs::File> {
    let archive = tokio::task::spawn_blocking(move || -> Result<File> {
        let source = File::open(&path)?;
        let mut archive = wrap_single_file(&entry_name, source, tempfile::tempfile()?)?;
        archive.seek(SeekFrom::Start(0))?;
        Ok(archive)
    })
    .await
    .map_err(|err| Error::Io(io::Error::other(format!("packaging task failed: {err}"))))??;
    Ok(tokio::fs::File::from_std(archive))
}
