//! Custom assertions for WebDAV integration tests.

use crate::common::TestServer;
use percent_encoding::percent_decode_str;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// Assert that a file exists and has the expected content.
pub async fn assert_file_content(server: &TestServer, path: &str, expected: &[u8]) {
    match server.get_bytes(path).await {
        Ok(actual) => {
            assert_eq!(
                actual.as_ref(),
                expected,
                "File content mismatch at {path}: expected {} bytes, got {} bytes",
                expected.len(),
                actual.len()
            );
        }
        Err((status, body)) => {
            panic!("Failed to read file {path}: status={status}, body={body}");
        }
    }
}

/// Assert that a path returns 404 Not Found.
pub async fn assert_not_found(server: &TestServer, path: &str) {
    let resp = server.get(path).await;
    assert_eq!(
        resp.status(),
        StatusCode::NOT_FOUND,
        "Expected 404 for {path}, got {}",
        resp.status()
    );
}

/// Assert that a response has a specific status code.
pub fn assert_status(actual: StatusCode, expected: StatusCode, context: &str) {
    assert_eq!(actual, expected, "{context}: expected status {expected}, got {actual}");
}

/// Assert that a collection lists exactly the expected child hrefs.
///
/// Runs a depth-1 PROPFIND and drops the collection's own entry.
pub async fn assert_dir_entries(server: &TestServer, path: &str, expected: &[&str]) {
    let (status, body) = server.propfind_body(path, "1").await;
    assert_eq!(status, StatusCode::MULTI_STATUS, "PROPFIND {path} failed: {body}");

    let own = format!("{}/", path.trim_end_matches('/'));
    let actual: BTreeSet<String> = extract_hrefs(&body)
        .into_iter()
        .filter(|href| *href != own)
        .collect();
    let expected: BTreeSet<String> = expected.iter().map(ToString::to_string).collect();

    assert_eq!(actual, expected, "Directory {path} entries mismatch");
}

/// Calculate SHA-256 hash of data.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Extract percent-decoded href values from a multistatus document, in
/// document order.
///
/// Line-based; relies on the server's indented output.
pub fn extract_hrefs(xml: &str) -> Vec<String> {
    xml.lines()
        .filter_map(|line| {
            let start = line.find("<D:href>")? + "<D:href>".len();
            let end = line[start..].find("</D:href>")?;
            let href = &line[start..start + end];
            Some(percent_decode_str(href).decode_utf8_lossy().into_owned())
        })
        .collect()
}
