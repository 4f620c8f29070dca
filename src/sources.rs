//! Fetching the source feeds into the working directory.
//!
//! Sources may be `http(s)://` URLs, `file://` URLs or plain paths. Any failure
//! here is fatal and happens before the registry is touched.

use crate::error::{ErrorCode, SyncError, SyncResult};
use flate2::read::GzDecoder;
use reqwest::blocking::get;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

fn fetch_error(message: String) -> SyncError {
    SyncError::new(ErrorCode::Fetch, message)
}

pub fn is_http_source(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

pub fn is_gzip_source(source: &str) -> bool {
    source.to_ascii_lowercase().ends_with(".gz")
}

struct SourceReader {
    reader: Box<dyn Read>,
    total_bytes: Option<u64>,
}

fn open_source_reader(source: &str) -> SyncResult<SourceReader> {
    if is_http_source(source) {
        let response = get(source)
            .map_err(|e| fetch_error(format!("Could not fetch '{source}': {e}")))?
            .error_for_status()
            .map_err(|e| fetch_error(format!("Could not fetch '{source}': {e}")))?;
        let total_bytes = response.content_length();
        return Ok(SourceReader {
            reader: Box::new(response),
            total_bytes,
        });
    }
    let path = local_source_path(source);
    let file = File::open(&path).map_err(|e| {
        fetch_error(format!(
            "Could not open source file '{}': {e}",
            path.display()
        ))
    })?;
    let total_bytes = file.metadata().ok().map(|m| m.len());
    Ok(SourceReader {
        reader: Box::new(file),
        total_bytes,
    })
}

fn local_source_path(source: &str) -> PathBuf {
    if let Some(stripped) = source.strip_prefix("file://") {
        PathBuf::from(stripped)
    } else {
        PathBuf::from(source)
    }
}

/// Copies `source` to `destination` byte for byte (compressed feeds stay
/// compressed). The data is written to a `.part` file first and renamed once
/// complete, so a failed download never leaves a truncated feed behind.
pub fn materialize_source(source: &str, destination: &Path) -> SyncResult<u64> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            fetch_error(format!(
                "Could not create destination directory '{}': {e}",
                parent.display()
            ))
        })?;
    }
    let mut tmp_os: OsString = destination.as_os_str().to_os_string();
    tmp_os.push(".part");
    let tmp_path = PathBuf::from(tmp_os);

    let SourceReader {
        mut reader,
        total_bytes,
    } = open_source_reader(source)?;
    debug!(source, ?total_bytes, "fetching source");
    let mut writer = BufWriter::new(File::create(&tmp_path).map_err(|e| {
        fetch_error(format!("Could not create '{}': {e}", tmp_path.display()))
    })?);

    let copied = match std::io::copy(&mut reader, &mut writer) {
        Ok(n) => n,
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            return Err(fetch_error(format!("Could not copy '{source}': {e}")));
        }
    };

    writer
        .flush()
        .map_err(|e| fetch_error(format!("Could not flush '{}': {e}", tmp_path.display())))?;
    drop(writer);
    fs::rename(&tmp_path, destination).map_err(|e| {
        fetch_error(format!(
            "Could not finalize destination '{}': {e}",
            destination.display()
        ))
    })?;
    info!(source, destination = %destination.display(), bytes = copied, "source fetched");
    Ok(copied)
}

/// Opens a local feed for line reading, decompressing `.gz` files on the fly.
pub fn open_feed(path: &Path) -> SyncResult<Box<dyn BufRead>> {
    let file = File::open(path).map_err(|e| {
        fetch_error(format!("Could not open feed '{}': {e}", path.display()))
    })?;
    if is_gzip_source(&path.to_string_lossy()) {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}
