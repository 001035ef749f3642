//! Stat a path on the agent host.

use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{AppError, Result};

/// `FileStat` arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStatArgs {
    /// Path to inspect.
    pub path: String,
    /// Stat the symlink target instead of the link itself.
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Also compute the file's SHA-256 checksum (regular files only).
    #[serde(default)]
    pub calculate_checksum: bool,
}

/// `FileStat` result.
///
/// `path` and `exists` are always present; everything else is populated
/// only when the path exists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileStatResult {
    /// The path that was inspected.
    pub path: String,
    /// Whether the path exists.
    pub exists: bool,
    /// Final path component.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_name: Option<String>,
    /// Size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Raw Unix mode bits (type + permissions).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_mode: Option<u32>,
    /// Whether the path is a directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_dir: Option<bool>,
    /// Whether the path is a symlink (always false with `follow_symlinks`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_symlink: Option<bool>,
    /// Modification time, seconds since the Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_secs: Option<i64>,
    /// Access time, seconds since the Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accessed_secs: Option<i64>,
    /// Owning uid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    /// Owning gid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
    /// Inode number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inode: Option<u64>,
    /// Hard link count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nlink: Option<u64>,
    /// Hex SHA-256 of the contents, when requested and a regular file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256_checksum: Option<String>,
}

/// Handle one `FileStat` call.
///
/// A missing path is not an error — the result reports `exists: false` so
/// callers can branch without string-matching error messages.
///
/// # Errors
///
/// Returns [`AppError::Handler`] for failures other than non-existence
/// (permission denied, unreadable file during checksum).
pub async fn file_stat(args: FileStatArgs) -> Result<FileStatResult> {
    let metadata = if args.follow_symlinks {
        tokio::fs::metadata(&args.path).await
    } else {
        tokio::fs::symlink_metadata(&args.path).await
    };

    let metadata = match metadata {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(FileStatResult {
                path: args.path,
                exists: false,
                ..FileStatResult::default()
            });
        }
        Err(e) => {
            return Err(AppError::Handler(format!(
                "failed to stat '{}': {e}",
                args.path
            )));
        }
    };

    let base_name = std::path::Path::new(&args.path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned());

    let sha256_checksum = if args.calculate_checksum && metadata.is_file() {
        let contents = tokio::fs::read(&args.path)
            .await
            .map_err(|e| AppError::Handler(format!("failed to read '{}': {e}", args.path)))?;
        let mut hasher = Sha256::new();
        hasher.update(&contents);
        Some(format!("{:x}", hasher.finalize()))
    } else {
        None
    };

    Ok(FileStatResult {
        path: args.path,
        exists: true,
        base_name,
        size: Some(metadata.len()),
        file_mode: Some(metadata.permissions().mode()),
        is_dir: Some(metadata.is_dir()),
        is_symlink: Some(metadata.file_type().is_symlink()),
        modified_secs: metadata.modified().ok().map(epoch_secs),
        accessed_secs: metadata.accessed().ok().map(epoch_secs),
        uid: Some(metadata.uid()),
        gid: Some(metadata.gid()),
        inode: Some(metadata.ino()),
        nlink: Some(metadata.nlink()),
        sha256_checksum,
    })
}

fn epoch_secs(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_secs()).unwrap_or(i64::MAX),
    }
}
