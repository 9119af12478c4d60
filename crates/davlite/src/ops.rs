//! Filesystem operations behind each mutating or reading verb.
//!
//! Every function takes paths that already went through
//! [`StorageRoot::resolve`](crate::sandbox::StorageRoot::resolve); nothing in
//! here re-checks the sandbox.
//!
//! Writes never expose partial state at the target path. Uploads land in a
//! temporary file beside the target, copies are built in a staging entry
//! beside the destination, and both are renamed into place only once
//! complete. An existing destination is moved aside first and removed after
//! the swap, so a failure at any point leaves the old destination untouched.
//! Temporary entries are owned by [`tempfile`] guards and disappear when the
//! operation errors out or its future is dropped.

use crate::error::{DavError, DavResult};
use crate::render;
use crate::resource::{self, Resource};
use crate::sandbox::{ResolvedPath, STAGING_PREFIX, StorageRoot, TRASH_PREFIX, is_reserved_name};
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Body;
use std::fmt::Display;
use std::io;
use std::path::Path;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt, Take};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// What a GET or HEAD resolved to.
pub enum Retrieved {
    /// Rendered HTML index of a collection.
    Index(String),
    /// An open file, limited to the length observed when it was opened.
    File {
        /// Descriptor taken from the open handle.
        resource: Resource,
        /// Reader over exactly `resource.size()` bytes.
        reader: Take<fs::File>,
    },
}

/// Result of a successful store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// No file existed at the target before.
    Created,
    /// An existing file was replaced.
    Replaced,
}

/// Whether a transfer keeps the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Duplicate the source.
    Copy,
    /// Relocate the source.
    Move,
}

/// Open a resource for reading.
pub async fn retrieve(root: &StorageRoot, target: &ResolvedPath) -> DavResult<Retrieved> {
    let described = resource::describe(target).await?;
    if described.is_collection() {
        let children = resource::describe_children(root, target).await?;
        return Ok(Retrieved::Index(render::directory_index(&described, &children)));
    }

    // Metadata comes from the handle, not the path, so a concurrent replace
    // cannot make the advertised length disagree with the streamed bytes.
    let file = fs::File::open(target.absolute())
        .await
        .map_err(|e| not_found_or(e, target))?;
    let metadata = file.metadata().await?;
    let resource = Resource::from_metadata(target, &metadata)?;
    if resource.is_collection() {
        return Err(DavError::Conflict(format!(
            "{} changed while opening",
            target.logical()
        )));
    }
    let reader = file.take(resource.size());
    Ok(Retrieved::File { resource, reader })
}

/// Write a request body to `target`, replacing any existing file.
pub async fn store<B>(target: &ResolvedPath, body: B) -> DavResult<StoreOutcome>
where
    B: Body<Data = Bytes>,
    B::Error: Display,
{
    if target.is_root() {
        return Err(DavError::AccessDenied("cannot overwrite the storage root".into()));
    }

    let existed = match fs::metadata(target.absolute()).await {
        Ok(m) if m.is_dir() => {
            return Err(DavError::AccessDenied(format!(
                "{} is a collection",
                target.logical()
            )));
        }
        Ok(_) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) if e.kind() == io::ErrorKind::NotADirectory => {
            return Err(parent_conflict(target));
        }
        Err(e) => return Err(e.into()),
    };

    let parent = parent_of(target.absolute())?;
    fs::create_dir_all(parent).await.map_err(|e| match e.kind() {
        io::ErrorKind::AlreadyExists | io::ErrorKind::NotADirectory => parent_conflict(target),
        _ => DavError::Io(e),
    })?;

    let temp = staging_builder().tempfile_in(parent)?;
    let (file, temp_path) = temp.into_parts();
    let mut file = fs::File::from_std(file);

    let mut body = std::pin::pin!(body);
    let mut written: u64 = 0;
    while let Some(frame) = body.frame().await {
        let frame =
            frame.map_err(|e| DavError::BadRequest(format!("failed to read request body: {e}")))?;
        if let Ok(data) = frame.into_data() {
            file.write_all(&data).await?;
            written += data.len() as u64;
        }
    }
    file.flush().await?;
    drop(file);

    temp_path
        .persist(target.absolute())
        .map_err(|e| DavError::Io(e.error))?;

    debug!(path = %target.logical(), bytes = written, replaced = existed, "Stored file");
    Ok(if existed {
        StoreOutcome::Replaced
    } else {
        StoreOutcome::Created
    })
}

/// Remove a file or a whole collection.
///
/// A symlink is removed itself; its target is left alone.
pub async fn delete(target: &ResolvedPath) -> DavResult<()> {
    if target.is_root() {
        return Err(DavError::AccessDenied("cannot delete the storage root".into()));
    }

    let metadata = fs::symlink_metadata(target.absolute())
        .await
        .map_err(|e| not_found_or(e, target))?;

    if metadata.is_dir() {
        fs::remove_dir_all(target.absolute()).await?;
    } else {
        fs::remove_file(target.absolute()).await?;
    }
    debug!(path = %target.logical(), collection = metadata.is_dir(), "Deleted");
    Ok(())
}

/// Create a single new collection.
pub async fn create_collection(target: &ResolvedPath) -> DavResult<()> {
    match fs::symlink_metadata(target.absolute()).await {
        Ok(_) => return Err(DavError::AlreadyExists(target.logical().to_string())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) if e.kind() == io::ErrorKind::NotADirectory => {
            return Err(parent_conflict(target));
        }
        Err(e) => return Err(e.into()),
    }

    match fs::create_dir(target.absolute()).await {
        Ok(()) => {
            debug!(path = %target.logical(), "Created collection");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(DavError::AlreadyExists(target.logical().to_string()))
        }
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => {
            Err(parent_conflict(target))
        }
        Err(e) => Err(e.into()),
    }
}

/// Copy or move `source` to `destination`.
///
/// With `overwrite` unset an existing destination fails the request. An
/// overwritten collection is replaced, not merged.
pub async fn copy_or_move(
    source: &ResolvedPath,
    destination: &ResolvedPath,
    mode: TransferMode,
    overwrite: bool,
) -> DavResult<()> {
    if source.is_root() || destination.is_root() {
        return Err(DavError::AccessDenied(
            "cannot copy or move the storage root".into(),
        ));
    }
    if source == destination {
        return Err(DavError::BadRequest(
            "source and destination are the same".into(),
        ));
    }

    let src_meta = fs::metadata(source.absolute())
        .await
        .map_err(|e| not_found_or(e, source))?;

    if src_meta.is_dir() && source.contains(destination) {
        return Err(DavError::BadRequest(format!(
            "cannot {mode:?} {} into itself",
            source.logical()
        )));
    }
    if destination.contains(source) {
        return Err(DavError::BadRequest(format!(
            "destination {} contains the source",
            destination.logical()
        )));
    }

    let dest_exists = match fs::symlink_metadata(destination.absolute()).await {
        Ok(_) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) if e.kind() == io::ErrorKind::NotADirectory => {
            return Err(parent_conflict(destination));
        }
        Err(e) => return Err(e.into()),
    };
    if dest_exists && !overwrite {
        return Err(DavError::PreconditionFailed(format!(
            "{} already exists",
            destination.logical()
        )));
    }

    let src = source.absolute().to_path_buf();
    let dst = destination.absolute().to_path_buf();
    tokio::task::spawn_blocking(move || transfer(&LocalFs, &src, &dst, mode))
        .await
        .map_err(|e| DavError::Internal(format!("transfer task failed: {e}")))?
        .map_err(|e| match e.kind() {
            io::ErrorKind::NotADirectory => parent_conflict(destination),
            _ => DavError::Io(e),
        })?;

    debug!(
        source = %source.logical(),
        destination = %destination.logical(),
        ?mode,
        replaced = dest_exists,
        "Transfer complete"
    );
    Ok(())
}

/// Filesystem calls a transfer can fail in.
///
/// Tests substitute an implementation that injects errors part-way through.
pub(crate) trait FsOps {
    fn copy_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::copy(from, to).map(|_| ())
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }

    fn remove(&self, path: &Path, is_dir: bool) -> io::Result<()> {
        if is_dir {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        }
    }
}

pub(crate) struct LocalFs;

impl FsOps for LocalFs {}

/// Blocking body of a copy or move.
pub(crate) fn transfer<F: FsOps>(ops: &F, src: &Path, dst: &Path, mode: TransferMode) -> io::Result<()> {
    let parent = parent_of(dst).map_err(|e| io::Error::other(e.to_string()))?;
    std::fs::create_dir_all(parent)?;
    let is_dir = std::fs::metadata(src)?.is_dir();

    if mode == TransferMode::Move {
        match install(ops, src, dst) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                debug!(src = %src.display(), dst = %dst.display(), "Rename crosses devices, copying instead");
            }
            Err(e) => return Err(e),
        }
    }

    if is_dir {
        let staging = staging_builder().tempdir_in(parent)?;
        copy_tree(ops, src, staging.path())?;
        install(ops, staging.path(), dst)?;
    } else {
        let staging = staging_builder().tempfile_in(parent)?.into_temp_path();
        ops.copy_file(src, &staging)?;
        install(ops, &staging, dst)?;
    }

    if mode == TransferMode::Move {
        if let Err(e) = ops.remove(src, is_dir) {
            warn!(
                src = %src.display(),
                dst = %dst.display(),
                error = %e,
                "Destination is complete but the source could not be fully removed"
            );
            return Err(e);
        }
    }
    Ok(())
}

/// Rename `staged` to `dst`, moving any existing `dst` aside first.
///
/// The displaced entry is restored if the final rename fails and deleted
/// once it succeeds.
fn install<F: FsOps>(ops: &F, staged: &Path, dst: &Path) -> io::Result<()> {
    match std::fs::symlink_metadata(dst) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => return ops.rename(staged, dst),
        Err(e) => return Err(e),
        Ok(_) => {}
    }

    let parent = parent_of(dst).map_err(|e| io::Error::other(e.to_string()))?;
    let trash = tempfile::Builder::new()
        .prefix(TRASH_PREFIX)
        .tempdir_in(parent)?;
    let displaced = trash.path().join("displaced");
    ops.rename(dst, &displaced)?;

    if let Err(e) = ops.rename(staged, dst) {
        if let Err(restore) = ops.rename(&displaced, dst) {
            warn!(path = %dst.display(), error = %restore, "Failed to restore displaced destination");
        }
        return Err(e);
    }

    if let Err(e) = trash.close() {
        warn!(path = %dst.display(), error = %e, "Failed to remove displaced destination");
    }
    Ok(())
}

/// Recreate the contents of `src` under the existing directory `dst`,
/// leaving out temporary entries of uploads still in flight.
fn copy_tree<F: FsOps>(ops: &F, src: &Path, dst: &Path) -> io::Result<()> {
    let entries = WalkDir::new(src)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !e.file_name().to_str().is_some_and(is_reserved_name));
    for entry in entries {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            ops.copy_file(entry.path(), &target)?;
        }
        trace!(entry = %relative.display(), "Copied");
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    let points_to = std::fs::read_link(link)?;
    std::os::unix::fs::symlink(points_to, target)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, _target: &Path) -> io::Result<()> {
    warn!(link = %link.display(), "Skipping symlink in copied tree");
    Ok(())
}

fn staging_builder() -> tempfile::Builder<'static, 'static> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(STAGING_PREFIX);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // Subject to the umask like any ordinary create.
        builder.permissions(std::fs::Permissions::from_mode(0o666));
    }
    builder
}

fn parent_of(path: &Path) -> DavResult<&Path> {
    path.parent()
        .ok_or_else(|| DavError::Internal(format!("{} has no parent", path.display())))
}

fn parent_conflict(target: &ResolvedPath) -> DavError {
    DavError::Conflict(format!(
        "a parent of {} is not a collection",
        target.logical()
    ))
}

fn not_found_or(e: io::Error, target: &ResolvedPath) -> DavError {
    match e.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory => {
            DavError::NotFound(target.logical().to_string())
        }
        _ => DavError::Io(e),
    }
}
