//! Error handling tests.
//!
//! These tests verify status codes and error semantics:
//! - 404 Not Found for missing resources
//! - 405 / 409 for MKCOL and PUT conflicts
//! - 501 for unsupported verbs
//! - Security: path traversal prevention

mod common;

use common::{TestServer, assert_file_content, assert_status};
use reqwest::StatusCode;

// ============================================================================
// 404 Not Found
// ============================================================================

#[tokio::test]
async fn test_get_nonexistent_returns_404() {
    let server = TestServer::with_temp_root().await;
    assert_eq!(server.get("/does_not_exist.txt").await.status(), StatusCode::NOT_FOUND);
    assert_eq!(server.get("/a/b/c/d/missing.txt").await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_nonexistent_returns_404() {
    let server = TestServer::with_temp_root().await;
    assert_eq!(server.delete("/nonexistent.txt").await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_through_file_returns_404() {
    let server = TestServer::with_temp_root().await;
    server.put_ok("/file.txt", b"x".to_vec()).await;
    assert_eq!(server.get("/file.txt/child").await.status(), StatusCode::NOT_FOUND);
}

// ============================================================================
// MKCOL and PUT conflicts
// ============================================================================

#[tokio::test]
async fn test_mkcol_twice_returns_405() {
    let server = TestServer::with_temp_root().await;
    assert_status(server.mkcol("/x/").await.status(), StatusCode::CREATED, "first MKCOL");
    assert_status(server.mkcol("/x/").await.status(), StatusCode::METHOD_NOT_ALLOWED, "second MKCOL");
}

#[tokio::test]
async fn test_mkcol_over_file_returns_405() {
    let server = TestServer::with_temp_root().await;
    server.put_ok("/taken", b"x".to_vec()).await;
    assert_eq!(server.mkcol("/taken").await.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_mkcol_missing_parent_returns_409() {
    let server = TestServer::with_temp_root().await;
    assert_eq!(server.mkcol("/no/such/parent").await.status(), StatusCode::CONFLICT);
    assert!(!server.root().join("no").exists());
}

#[tokio::test]
async fn test_put_onto_collection_returns_403() {
    let server = TestServer::with_temp_root().await;
    server.mkcol_ok("/dir").await;
    assert_eq!(server.put("/dir", b"x".to_vec()).await.status(), StatusCode::FORBIDDEN);
    assert!(server.root().join("dir").is_dir());
}

#[tokio::test]
async fn test_put_below_file_returns_409() {
    let server = TestServer::with_temp_root().await;
    server.put_ok("/file.txt", b"x".to_vec()).await;
    assert_eq!(
        server.put("/file.txt/child.txt", b"y".to_vec()).await.status(),
        StatusCode::CONFLICT
    );
    assert_file_content(&server, "/file.txt", b"x").await;
}

#[tokio::test]
async fn test_delete_root_returns_403() {
    let server = TestServer::with_temp_root().await;
    server.put_ok("/keep.txt", b"keep".to_vec()).await;
    assert_eq!(server.delete("/").await.status(), StatusCode::FORBIDDEN);
    assert_file_content(&server, "/keep.txt", b"keep").await;
}

// ============================================================================
// Unsupported verbs
// ============================================================================

#[tokio::test]
async fn test_unknown_verbs_return_501() {
    let server = TestServer::with_temp_root().await;
    for verb in ["LOCK", "UNLOCK", "PATCH", "SEARCH"] {
        let resp = server.request(verb, "/").send().await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED, "{verb}");
    }
}

// ============================================================================
// Path traversal
// ============================================================================

#[tokio::test]
async fn test_dotdot_traversal_returns_403() {
    let server = TestServer::with_temp_root().await;
    std::fs::write(server.outside().join("secret.txt"), b"secret").unwrap();

    for path in [
        "/../secret.txt",
        "/%2e%2e/secret.txt",
        "/%2E%2E/%2E%2E/etc/passwd",
        "/a/../../secret.txt",
        "/a/%2e%2e%2f%2e%2e%2fsecret.txt",
    ] {
        assert_eq!(server.raw_status("GET", path).await, 403, "GET {path}");
    }

    assert_eq!(server.raw_status("DELETE", "/../secret.txt").await, 403);
    assert_eq!(server.raw_status("PUT", "/../planted.txt").await, 403);
    assert_eq!(server.raw_status("MKCOL", "/%2e%2e/newdir").await, 403);

    assert!(server.outside().join("secret.txt").exists());
    assert!(!server.outside().join("planted.txt").exists());
    assert!(!server.outside().join("newdir").exists());
}

#[tokio::test]
async fn test_dotdot_within_root_is_allowed() {
    let server = TestServer::with_temp_root().await;
    server.put_ok("/a/file.txt", b"inside".to_vec()).await;
    assert_eq!(server.raw_status("GET", "/a/b/../file.txt").await, 200);
}

#[tokio::test]
async fn test_sibling_prefix_directory_is_not_reachable() {
    let server = TestServer::with_temp_root().await;
    // The storage root is `<tmp>/store`; `<tmp>/storeX` shares its prefix
    let sibling = server.outside().join("storeX");
    std::fs::create_dir(&sibling).unwrap();
    std::fs::write(sibling.join("data.txt"), b"nope").unwrap();

    assert_eq!(server.raw_status("GET", "/../storeX/data.txt").await, 403);
}

#[cfg(unix)]
#[tokio::test]
async fn test_symlink_escape_returns_403() {
    let server = TestServer::with_temp_root().await;
    std::fs::write(server.outside().join("secret.txt"), b"secret").unwrap();
    std::os::unix::fs::symlink(server.outside(), server.root().join("out")).unwrap();

    assert_eq!(server.get("/out/secret.txt").await.status(), StatusCode::FORBIDDEN);
    assert_eq!(server.put("/out/planted.txt", b"x".to_vec()).await.status(), StatusCode::FORBIDDEN);
    assert!(!server.outside().join("planted.txt").exists());
}

#[tokio::test]
async fn test_invalid_utf8_path_returns_400() {
    let server = TestServer::with_temp_root().await;
    assert_eq!(server.raw_status("GET", "/%ff%fe.txt").await, 400);
}
