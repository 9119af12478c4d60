//! Storage root sandboxing.
//!
//! Every client-supplied path goes through [`StorageRoot::resolve`] before
//! anything touches the filesystem. Resolution happens in two stages:
//!
//! 1. **Lexical**: the URL path is split on `/`, empty and `.` segments are
//!    dropped and `..` pops a segment. Popping past the root is rejected
//!    immediately, without a single filesystem call.
//! 2. **Canonical**: the longest existing prefix of the joined path is
//!    canonicalized (resolving symlinks) and the non-existent tail is
//!    re-appended. The result must be the root itself or a component-wise
//!    descendant of it.
//!
//! The component-wise comparison matters: with a root of `/data/store`, a
//! string-prefix test would accept `/data/storeX`; [`Path::starts_with`]
//! does not.
//!
//! Names starting with [`STAGING_PREFIX`] or [`TRASH_PREFIX`] belong to the
//! server's own temporary entries. They never resolve and never appear in
//! listings.

use crate::error::{DavError, DavResult};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, trace};

/// Prefix for in-flight uploads and copy staging entries.
pub(crate) const STAGING_PREFIX: &str = ".davlite-staging-";

/// Prefix for directories holding a displaced destination during a swap.
pub(crate) const TRASH_PREFIX: &str = ".davlite-trash-";

/// Whether `name` is one of the server's temporary entries.
pub(crate) fn is_reserved_name(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX) || name.starts_with(TRASH_PREFIX)
}

/// The directory all resolved paths are confined to.
///
/// Holds the canonical form of the configured directory so later checks
/// compare like with like.
#[derive(Debug, Clone)]
pub struct StorageRoot {
    root: PathBuf,
}

impl StorageRoot {
    /// Open (creating if needed) the storage root at `path`.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let root = std::fs::canonicalize(path)?;
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {}", root.display()),
            ));
        }
        debug!(root = %root.display(), "Storage root opened");
        Ok(Self { root })
    }

    /// Canonical path of the storage root.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Whether a canonical path lies inside the sandbox.
    pub fn contains(&self, canonical: &Path) -> bool {
        canonical.starts_with(&self.root)
    }

    /// Resolve a percent-decoded URL path to a location inside the root.
    pub async fn resolve(&self, logical: &str) -> DavResult<ResolvedPath> {
        let segments = normalize_segments(logical)?;

        let mut absolute = self.root.clone();
        absolute.extend(&segments);

        let canonical = self.canonicalize_lenient(&absolute).await?;
        if !self.contains(&canonical) {
            debug!(path = %logical, canonical = %canonical.display(), "Path escapes storage root");
            return Err(DavError::AccessDenied(logical.to_string()));
        }

        trace!(path = %logical, absolute = %absolute.display(), "Resolved path");
        Ok(ResolvedPath {
            logical: logical_from_segments(&segments),
            segments,
            absolute,
        })
    }

    /// Resolve an entry found while enumerating `parent`.
    ///
    /// Returns `None` when the entry is a symlink whose target is missing or
    /// lies outside the root, so listings never describe foreign paths.
    pub async fn resolve_child(&self, parent: &ResolvedPath, name: &str) -> Option<ResolvedPath> {
        if name.contains('/') || name == "." || name == ".." {
            return None;
        }
        if is_reserved_name(name) {
            trace!(entry = name, "Skipping temporary entry");
            return None;
        }
        let absolute = parent.absolute.join(name);
        match fs::canonicalize(&absolute).await {
            Ok(canonical) if self.contains(&canonical) => {
                let mut segments = parent.segments.clone();
                segments.push(name.to_string());
                Some(ResolvedPath {
                    logical: logical_from_segments(&segments),
                    segments,
                    absolute,
                })
            }
            Ok(canonical) => {
                debug!(entry = %absolute.display(), target = %canonical.display(), "Skipping entry outside storage root");
                None
            }
            Err(e) => {
                trace!(entry = %absolute.display(), error = %e, "Skipping unresolvable entry");
                None
            }
        }
    }

    /// Canonicalize a path whose trailing components may not exist yet.
    async fn canonicalize_lenient(&self, path: &Path) -> DavResult<PathBuf> {
        let mut existing = path.to_path_buf();
        let mut tail: Vec<OsString> = Vec::new();

        loop {
            match fs::canonicalize(&existing).await {
                Ok(mut canonical) => {
                    canonical.extend(tail.iter().rev());
                    return Ok(canonical);
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
                    ) =>
                {
                    if existing == self.root {
                        return Err(DavError::Internal(format!(
                            "storage root is unavailable: {e}"
                        )));
                    }
                    // The entry exists but cannot be resolved: a dangling symlink
                    // whose target we cannot vouch for.
                    if fs::symlink_metadata(&existing).await.is_ok() {
                        return Err(DavError::AccessDenied(format!(
                            "unresolvable link: {}",
                            existing.display()
                        )));
                    }
                    let Some(name) = existing.file_name().map(ToOwned::to_owned) else {
                        return Err(e.into());
                    };
                    tail.push(name);
                    existing.pop();
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// A request path after sandbox resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    logical: String,
    segments: Vec<String>,
    absolute: PathBuf,
}

impl ResolvedPath {
    /// Normalized URL path, always starting with `/` and never ending with one
    /// (except for the root itself).
    pub fn logical(&self) -> &str {
        &self.logical
    }

    /// Location on disk, lexically inside the storage root.
    pub fn absolute(&self) -> &Path {
        &self.absolute
    }

    /// Whether this is the storage root itself.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Final path segment (empty for the root).
    pub fn name(&self) -> &str {
        self.segments.last().map_or("", String::as_str)
    }

    /// Whether `other` is this path or lies beneath it.
    pub fn contains(&self, other: &ResolvedPath) -> bool {
        other.segments.starts_with(&self.segments)
    }
}

/// Split a URL path into normalized segments.
fn normalize_segments(logical: &str) -> DavResult<Vec<String>> {
    let mut segments: Vec<String> = Vec::new();
    for segment in logical.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(DavError::AccessDenied(logical.to_string()));
                }
            }
            s if s.contains('\0') => {
                return Err(DavError::BadRequest(format!("invalid path segment in {logical}")));
            }
            s if cfg!(windows) && s.contains(['\\', ':']) => {
                return Err(DavError::AccessDenied(logical.to_string()));
            }
            s => segments.push(s.to_string()),
        }
    }
    if segments.iter().any(|s| is_reserved_name(s)) {
        return Err(DavError::AccessDenied(logical.to_string()));
    }
    Ok(segments)
}

fn logical_from_segments(segments: &[String]) -> String {
    format!("/{}", segments.join("/"))
}
