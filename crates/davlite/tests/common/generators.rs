//! Test data generators for WebDAV integration tests.

use rand::RngCore;

/// Generate random bytes of specified size.
pub fn random_bytes(size: usize) -> Vec<u8> {
    let mut data = vec![0u8; size];
    rand::rng().fill_bytes(&mut data);
    data
}

/// Generate content containing all 256 possible byte values.
pub fn all_byte_values() -> Vec<u8> {
    (0u8..=255).collect()
}

/// A filename that needs percent-encoding in URLs.
pub fn special_filename() -> String {
    "file with spaces & (special) chars!.txt".to_string()
}

/// A filename with non-ASCII characters.
pub fn unicode_filename() -> String {
    "文件-αβγ.txt".to_string()
}
