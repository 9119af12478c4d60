//! Exit codes for the CLI.
//!
//! These follow common Unix conventions so scripts can tell failure
//! classes apart.

/// Successful execution
pub const SUCCESS: u8 = 0;

/// General/unspecified error
pub const GENERAL_ERROR: u8 = 1;

/// Command-line usage error (bad arguments, unknown setting)
pub const USAGE_ERROR: u8 = 2;

/// Configuration or credentials file is unreadable or invalid
pub const CONFIG_ERROR: u8 = 3;

/// Referenced user or path does not exist
pub const NOT_FOUND: u8 = 4;

/// Permission denied (filesystem access)
pub const PERMISSION_DENIED: u8 = 5;
