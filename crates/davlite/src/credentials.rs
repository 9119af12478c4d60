//! User credentials for the HTTP Basic authentication gate.
//!
//! Credentials live in a JSON object mapping each username to the base64
//! encoding of the SHA-256 digest of its password:
//!
//! ```json
//! { "admin": "XohImNooBHFR0OVvjcYpJ3NgPQ1qq73WKhHvch0VQtg=" }
//! ```
//!
//! The in-memory map is guarded by a [`RwLock`] so concurrent requests only
//! take read locks. Mutations rewrite the whole file through a temporary
//! file and a rename.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Account created when the credentials file does not exist yet.
pub const DEFAULT_USERNAME: &str = "admin";
/// Password of the default account.
pub const DEFAULT_PASSWORD: &str = "password";

/// Errors from loading or saving the credentials file.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Reading or writing the file failed.
    #[error("Failed to access credentials file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file is not a JSON object of strings.
    #[error("Invalid credentials file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Usernames must be non-empty and cannot contain `:`.
    #[error("Invalid username: {0:?}")]
    InvalidUsername(String),
}

/// Checks credentials presented with a request.
pub trait Authenticator: Send + Sync {
    /// Whether `password` is correct for `username`.
    fn validate(&self, username: &str, password: &str) -> bool;

    /// Whether an `Authorization` header value carries valid Basic credentials.
    fn validate_header(&self, header: &str) -> bool {
        parse_basic(header).is_some_and(|(user, pass)| self.validate(&user, &pass))
    }
}

/// File-backed credential store.
pub struct CredentialStore {
    path: PathBuf,
    users: RwLock<HashMap<String, String>>,
}

impl CredentialStore {
    /// Load the store from `path`, creating it with the default account if
    /// the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CredentialError> {
        let path = path.into();
        let users = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str::<HashMap<String, String>>(&contents).map_err(
                |source| CredentialError::Parse {
                    path: path.clone(),
                    source,
                },
            )?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let mut users = HashMap::new();
                users.insert(DEFAULT_USERNAME.to_string(), hash_password(DEFAULT_PASSWORD));
                write_users(&path, &users)?;
                warn!(
                    path = %path.display(),
                    "Created default user '{DEFAULT_USERNAME}' with password '{DEFAULT_PASSWORD}'; change it before exposing the server"
                );
                users
            }
            Err(source) => return Err(CredentialError::Io { path, source }),
        };

        debug!(path = %path.display(), users = users.len(), "Loaded credentials");
        Ok(Self {
            path,
            users: RwLock::new(users),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add a user or change the password of an existing one.
    pub fn add_user(&self, username: &str, password: &str) -> Result<(), CredentialError> {
        if username.is_empty() || username.contains(':') {
            return Err(CredentialError::InvalidUsername(username.to_string()));
        }
        let mut users = self.users.write();
        let previous = users.insert(username.to_string(), hash_password(password));
        if let Err(e) = write_users(&self.path, &users) {
            match previous {
                Some(hash) => users.insert(username.to_string(), hash),
                None => users.remove(username),
            };
            return Err(e);
        }
        info!(username, updated = previous.is_some(), "Saved user");
        Ok(())
    }

    /// Remove a user. Returns `false` if no such user exists.
    pub fn remove_user(&self, username: &str) -> Result<bool, CredentialError> {
        let mut users = self.users.write();
        let Some(hash) = users.remove(username) else {
            return Ok(false);
        };
        if let Err(e) = write_users(&self.path, &users) {
            users.insert(username.to_string(), hash);
            return Err(e);
        }
        info!(username, "Removed user");
        Ok(true)
    }

    /// All usernames, sorted.
    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<_> = self.users.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Authenticator for CredentialStore {
    fn validate(&self, username: &str, password: &str) -> bool {
        let users = self.users.read();
        users
            .get(username)
            .is_some_and(|stored| *stored == hash_password(password))
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("path", &self.path)
            .field("users", &self.users.read().len())
            .finish_non_exhaustive()
    }
}

/// Hash a password the way it is stored on disk.
pub fn hash_password(password: &str) -> String {
    STANDARD.encode(Sha256::digest(password.as_bytes()))
}

/// Decode an `Authorization: Basic` value into `(username, password)`.
///
/// The scheme is matched case-insensitively and the decoded payload is split
/// on the first `:`, so passwords may contain colons.
pub fn parse_basic(header: &str) -> Option<(String, String)> {
    let header = header.trim();
    let (scheme, payload) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(payload.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

fn write_users(path: &Path, users: &HashMap<String, String>) -> Result<(), CredentialError> {
    let io_err = |source| CredentialError::Io {
        path: path.to_path_buf(),
        source,
    };

    let sorted: BTreeMap<_, _> = users.iter().collect();
    let json = serde_json::to_string_pretty(&sorted).map_err(|e| io_err(io::Error::other(e)))?;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(io_err)?;
    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    temp.write_all(json.as_bytes()).map_err(io_err)?;
    temp.write_all(b"\n").map_err(io_err)?;
    temp.as_file().sync_all().map_err(io_err)?;
    temp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}
