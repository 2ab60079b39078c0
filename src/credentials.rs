//! Provider token loading.
//!
//! Sources are tried in order: the token file, the OS keychain, then the
//! `PROVIDER_TOKEN` environment variable.

use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::{AppError, Result};

/// Keychain service name.
pub const KEYRING_SERVICE: &str = "provider-agent";

/// Keychain entry holding the token.
pub const KEYRING_KEY: &str = "provider_token";

/// Environment variable fallback.
pub const TOKEN_ENV: &str = "PROVIDER_TOKEN";

/// Read a single-line token file.
///
/// Returns `Ok(None)` when the file does not exist or holds only whitespace.
///
/// # Errors
///
/// Returns `AppError::Io` if the file exists but cannot be read.
pub fn read_token_file(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(raw) => {
            let token = raw.trim();
            if token.is_empty() {
                warn!(path = %path.display(), "token file is empty");
                Ok(None)
            } else {
                Ok(Some(token.to_owned()))
            }
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no token file");
            Ok(None)
        }
        Err(err) => Err(AppError::Io(format!(
            "cannot read token file {}: {err}",
            path.display()
        ))),
    }
}

/// Load the provider token from the first source that has one.
///
/// # Errors
///
/// Returns `AppError::Config` if no source provides a token, or
/// `AppError::Io` if the token file exists but is unreadable.
pub async fn load_token(token_file: &Path) -> Result<String> {
    if let Some(token) = read_token_file(token_file)? {
        info!(path = %token_file.display(), "provider token loaded from file");
        return Ok(token);
    }

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(|| {
        keyring::Entry::new(KEYRING_SERVICE, KEYRING_KEY).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.trim().is_empty() => {
            info!("provider token loaded from keychain");
            return Ok(value.trim().to_owned());
        }
        Ok(_) => warn!("keychain entry is empty, trying env var"),
        Err(err) => debug!(?err, "keychain lookup failed, trying env var"),
    }

    env::var(TOKEN_ENV)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            AppError::Config(format!(
                "provider token not found: put it in {}, the {KEYRING_SERVICE} keychain entry, or {TOKEN_ENV}",
                token_file.display()
            ))
        })
}

/// Delete the token file after a successful claim. Failures are logged.
pub fn remove_token_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => info!(path = %path.display(), "token file removed after claim"),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "could not remove token file"),
    }
}
