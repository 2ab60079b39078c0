//! Unit tests for provider token loading.

use std::io::Write;

use serial_test::serial;

use provider_agent::credentials::{load_token, read_token_file, remove_token_file, TOKEN_ENV};
use provider_agent::AppError;

#[test]
fn token_file_is_trimmed() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "  tok-123  ").expect("write");

    let token = read_token_file(file.path()).expect("readable");
    assert_eq!(token.as_deref(), Some("tok-123"));
}

#[test]
fn missing_token_file_is_none() {
    let dir = tempfile::tempdir().expect("tempdir");
    let token = read_token_file(&dir.path().join("provider.token")).expect("missing is fine");
    assert!(token.is_none());
}

#[test]
fn blank_token_file_is_none() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "   ").expect("write");
    assert!(read_token_file(file.path()).expect("readable").is_none());
}

/// A directory in place of the token file is an I/O error, not "no token".
#[test]
fn unreadable_token_file_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = read_token_file(dir.path()).expect_err("directory is not a token file");
    assert!(matches!(err, AppError::Io(_)));
}

/// The token file wins over every other source.
#[tokio::test]
#[serial]
async fn file_token_takes_precedence() {
    std::env::set_var(TOKEN_ENV, "from-env");
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "from-file").expect("write");

    let token = load_token(file.path()).await;
    std::env::remove_var(TOKEN_ENV);

    assert_eq!(token.expect("token"), "from-file");
}

#[test]
fn remove_token_file_deletes_and_tolerates_missing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("provider.token");
    std::fs::write(&path, "tok").expect("write");

    remove_token_file(&path);
    assert!(!path.exists());

    remove_token_file(&path);
}
