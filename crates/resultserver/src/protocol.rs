// SPDX-License-Identifier: MIT

//! The two upload protocols a connected guest agent speaks after the
//! TCP handshake: `FILE` (logs/memory/files, capped at 128 MiB) and
//! `SCREENSHOT` (jpeg only, capped at 4 MiB). Port of
//! `resultserver.py`'s `FileUpload`/`ScreenshotUpload`/`WriteLimiter`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use vmn_core::UploadError;
use vmn_storage::{sanitize_filename, split_category_path, TaskPaths};

pub const FILE_MAX_BYTES: u64 = 128 * 1024 * 1024;
pub const SCREENSHOT_MAX_BYTES: u64 = 4 * 1024 * 1024;
const JPEG_HEADER: [u8; 2] = [0xFF, 0xD8];
const TRUNCATION_MARKER: &[u8] = b"... (truncated by resultserver)";
const READ_CHUNK: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    File,
    Screenshot,
}

impl Protocol {
    pub fn parse(header: &str) -> Result<Self, UploadError> {
        match header.trim() {
            "FILE" => Ok(Protocol::File),
            "SCREENSHOT" => Ok(Protocol::Screenshot),
            other => Err(UploadError::UnsupportedProtocol(other.to_string())),
        }
    }
}

/// Read the one-line protocol header (`FILE` or `SCREENSHOT`) from a
/// freshly accepted connection.
pub async fn read_protocol_header<R>(reader: &mut BufReader<R>) -> Result<Protocol, UploadError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    let n = reader
        .read_line(&mut line)
        .await
        .map_err(|e| UploadError::IllegalPath(e.to_string()))?;
    if n == 0 || line.trim().is_empty() {
        return Err(UploadError::UnsupportedProtocol(String::new()));
    }
    Protocol::parse(&line)
}

/// Copy up to `limit` bytes from `reader` into `file`, enforcing an
/// optional leading-bytes header check first. On overrun, writes the
/// truncation marker and returns `MaxBytesWritten` without closing the
/// caller's file handle (the caller is responsible for that).
async fn copy_limited<R>(
    reader: &mut R,
    file: &mut File,
    limit: u64,
    header: Option<&[u8]>,
) -> Result<(), UploadError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    if let Some(expected) = header {
        let mut buf = vec![0u8; expected.len()];
        reader
            .read_exact(&mut buf)
            .await
            .map_err(|_| UploadError::HeaderMismatch)?;
        if buf != expected {
            return Err(UploadError::HeaderMismatch);
        }
        file.write_all(&buf)
            .map_err(|e| UploadError::IllegalPath(e.to_string()))?;
    }

    let mut remaining = limit.saturating_sub(header.map(|h| h.len() as u64).unwrap_or(0));
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = reader
            .read(&mut chunk)
            .await
            .map_err(|e| UploadError::IllegalPath(e.to_string()))?;
        if n == 0 {
            break;
        }
        let n = n as u64;
        let write = n.min(remaining) as usize;
        if write > 0 {
            file.write_all(&chunk[..write])
                .map_err(|e| UploadError::IllegalPath(e.to_string()))?;
            remaining -= write as u64;
        }
        if n as usize != write {
            let _ = file.write_all(TRUNCATION_MARKER);
            let _ = file.flush();
            return Err(UploadError::MaxBytesWritten(limit));
        }
    }
    let _ = file.flush();
    Ok(())
}

/// Exclusive-create a file at `path`, translating `EEXIST` into
/// `AlreadyExists` rather than letting an overwrite attempt proceed.
fn create_exclusive(path: &Path) -> Result<File, UploadError> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                UploadError::AlreadyExists
            } else {
                UploadError::IllegalPath(e.to_string())
            }
        })
}

/// Handle a `FILE` upload: read the `<category>/<filename>` header line,
/// sanitize it against the category safelist, and stream up to
/// [`FILE_MAX_BYTES`] into the resolved path.
pub async fn handle_file_upload<R>(
    paths: &TaskPaths,
    reader: &mut BufReader<R>,
) -> Result<(), UploadError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .await
        .map_err(|e| UploadError::IllegalPath(e.to_string()))?;
    let line = line.trim();

    let (category, filename) = split_category_path(line)
        .ok_or_else(|| UploadError::IllegalPath(format!("malformed upload path {line:?}")))?;
    let dir = paths
        .category_dir(category)
        .ok_or_else(|| UploadError::IllegalPath(format!("banned category {category:?}")))?;
    let cleaned = sanitize_filename(filename).map_err(|e| UploadError::IllegalPath(e.to_string()))?;

    let dest = dir.join(&cleaned);
    let mut file = create_exclusive(&dest)?;
    let result = copy_limited(reader, &mut file, FILE_MAX_BYTES, None).await;
    drop(file);
    result
}

/// Handle a `SCREENSHOT` upload: verify the JPEG SOI header, stream up
/// to [`SCREENSHOT_MAX_BYTES`], and delete the partial file on a header
/// mismatch (a truncated/non-jpeg stream, not a size overrun).
pub async fn handle_screenshot_upload<R>(
    paths: &TaskPaths,
    ms_since_map: u64,
    reader: &mut BufReader<R>,
) -> Result<(), UploadError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let dest = paths.screenshot(ms_since_map);
    let mut file = create_exclusive(&dest)?;
    let result = copy_limited(reader, &mut file, SCREENSHOT_MAX_BYTES, Some(&JPEG_HEADER)).await;
    drop(file);
    if let Err(UploadError::HeaderMismatch) = &result {
        let _ = std::fs::remove_file(&dest);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmn_core::TaskId;

    #[tokio::test]
    async fn file_upload_writes_bytes_under_the_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = TaskPaths::new(tmp.path(), &TaskId::new("t1"));
        paths.ensure_dirs().unwrap();

        let body = b"logs/task.log\nhello world".to_vec();
        let mut reader = BufReader::new(&body[..]);
        handle_file_upload(&paths, &mut reader).await.unwrap();

        let written = std::fs::read(paths.category_dir("logs").unwrap().join("task.log")).unwrap();
        assert_eq!(written, b"hello world");
    }

    #[tokio::test]
    async fn file_upload_rejects_banned_category() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = TaskPaths::new(tmp.path(), &TaskId::new("t1"));
        paths.ensure_dirs().unwrap();

        let body = b"secrets/task.log\nhello".to_vec();
        let mut reader = BufReader::new(&body[..]);
        let result = handle_file_upload(&paths, &mut reader).await;
        assert!(matches!(result, Err(UploadError::IllegalPath(_))));
    }

    #[tokio::test]
    async fn file_upload_rejects_overwrite_of_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = TaskPaths::new(tmp.path(), &TaskId::new("t1"));
        paths.ensure_dirs().unwrap();
        std::fs::write(paths.category_dir("logs").unwrap().join("task.log"), b"old").unwrap();

        let body = b"logs/task.log\nnew data".to_vec();
        let mut reader = BufReader::new(&body[..]);
        let result = handle_file_upload(&paths, &mut reader).await;
        assert!(matches!(result, Err(UploadError::AlreadyExists)));
    }

    #[tokio::test]
    async fn screenshot_with_valid_jpeg_header_succeeds() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = TaskPaths::new(tmp.path(), &TaskId::new("t1"));
        paths.ensure_dirs().unwrap();

        let mut body = vec![0xFF, 0xD8];
        body.extend_from_slice(b"rest of jpeg bytes");
        let mut reader = BufReader::new(&body[..]);
        handle_screenshot_upload(&paths, 1500, &mut reader).await.unwrap();
        assert!(paths.screenshot(1500).exists());
    }

    #[tokio::test]
    async fn screenshot_with_bad_header_is_deleted() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = TaskPaths::new(tmp.path(), &TaskId::new("t1"));
        paths.ensure_dirs().unwrap();

        let body = b"not a jpeg at all".to_vec();
        let mut reader = BufReader::new(&body[..]);
        let result = handle_screenshot_upload(&paths, 1500, &mut reader).await;
        assert!(matches!(result, Err(UploadError::HeaderMismatch)));
        assert!(!paths.screenshot(1500).exists());
    }

    #[tokio::test]
    async fn file_upload_truncates_past_the_size_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = TaskPaths::new(tmp.path(), &TaskId::new("t1"));
        paths.ensure_dirs().unwrap();

        let mut file = create_exclusive(&tmp.path().join("probe")).unwrap();
        let oversized = vec![b'x'; 64];
        let mut reader: &[u8] = &oversized;
        let result = copy_limited(&mut reader, &mut file, 8, None).await;
        assert!(matches!(result, Err(UploadError::MaxBytesWritten(8))));

        let contents = std::fs::read(tmp.path().join("probe")).unwrap();
        assert!(contents.starts_with(&oversized[..8]));
        assert!(contents.ends_with(TRUNCATION_MARKER));
    }
}
