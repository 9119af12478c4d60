//! Resource descriptors derived from the filesystem.
//!
//! A [`Resource`] is a read projection of one filesystem entry. Nothing is
//! cached: every request describes the entry afresh so the filesystem stays
//! the single source of truth.

use crate::error::{DavError, DavResult};
use crate::sandbox::{ResolvedPath, StorageRoot};
use std::fs::Metadata;
use std::path::Path;
use std::time::SystemTime;
use tokio::fs;
use tracing::debug;

/// Content type reported for files with an unknown extension.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// What kind of entry a resource is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKind {
    /// A regular file.
    File {
        /// Size in bytes.
        size: u64,
        /// MIME type derived from the extension.
        content_type: &'static str,
    },
    /// A directory.
    Collection,
}

/// Metadata for one resource in the tree.
#[derive(Debug, Clone)]
pub struct Resource {
    /// Normalized logical URL path (no trailing slash).
    pub path: String,
    /// Display name (empty for the root).
    pub name: String,
    /// File or collection.
    pub kind: ResourceKind,
    /// Last modification time.
    pub modified: SystemTime,
}

impl Resource {
    /// Build a descriptor from already-fetched metadata.
    pub fn from_metadata(resolved: &ResolvedPath, metadata: &Metadata) -> DavResult<Self> {
        let kind = if metadata.is_dir() {
            ResourceKind::Collection
        } else if metadata.is_file() {
            ResourceKind::File {
                size: metadata.len(),
                content_type: content_type_for(resolved.absolute()),
            }
        } else {
            return Err(DavError::NotFound(resolved.logical().to_string()));
        };

        Ok(Self {
            path: resolved.logical().to_string(),
            name: resolved.name().to_string(),
            kind,
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        })
    }

    /// Whether this resource is a collection.
    pub fn is_collection(&self) -> bool {
        matches!(self.kind, ResourceKind::Collection)
    }

    /// Size in bytes (zero for collections).
    pub fn size(&self) -> u64 {
        match self.kind {
            ResourceKind::File { size, .. } => size,
            ResourceKind::Collection => 0,
        }
    }

    /// Last modification time as an HTTP date.
    pub fn last_modified(&self) -> String {
        http_date(self.modified)
    }
}

/// Describe the entry at a resolved path.
///
/// Fails with [`DavError::NotFound`] when nothing (or something that is
/// neither a file nor a directory) lives there.
pub async fn describe(resolved: &ResolvedPath) -> DavResult<Resource> {
    let metadata = match fs::metadata(resolved.absolute()).await {
        Ok(m) => m,
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
            ) =>
        {
            return Err(DavError::NotFound(resolved.logical().to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    Resource::from_metadata(resolved, &metadata)
}

/// Describe the direct children of a collection, sorted by name.
///
/// Entries that vanish mid-listing, are neither files nor directories, have
/// non-UTF-8 names or point outside the sandbox are left out.
pub async fn describe_children(root: &StorageRoot, parent: &ResolvedPath) -> DavResult<Vec<Resource>> {
    let mut entries = fs::read_dir(parent.absolute()).await?;
    let mut children = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            debug!(parent = %parent.logical(), name = ?file_name, "Skipping non-UTF-8 entry");
            continue;
        };
        let Some(child) = root.resolve_child(parent, name).await else {
            continue;
        };
        match describe(&child).await {
            Ok(resource) => children.push(resource),
            Err(DavError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
    }

    children.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(children)
}

/// Format a timestamp as an RFC 7231 IMF-fixdate (always GMT).
pub fn http_date(time: SystemTime) -> String {
    httpdate::fmt_http_date(time)
}

/// Look up the MIME type for a path by its extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return DEFAULT_CONTENT_TYPE;
    };
    match ext.to_ascii_lowercase().as_str() {
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "wasm" => "application/wasm",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        _ => DEFAULT_CONTENT_TYPE,
    }
}
