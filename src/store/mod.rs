//! Content store abstraction.
//!
//! The [`ContentStore`] trait is the only surface the session layer sees of
//! the local storage node. Every operation takes an explicit time budget
//! and resolves to success or failure; none may hang past its budget.

pub mod kubo;

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::{AppError, Result};

/// Boxed future returned by [`ContentStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Capability interface over the local content-addressed store.
pub trait ContentStore: Send + Sync {
    /// Local peer identifier presented to the coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Identity`] if the identifier cannot be read.
    fn peer_id(&self, timeout: Duration) -> StoreFuture<'_, String>;

    /// Retain `cid`. Pinning an already pinned identifier succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Store`] on failure and [`AppError::Timeout`] when
    /// `timeout` elapses first.
    fn pin<'a>(&'a self, cid: &'a str, timeout: Duration) -> StoreFuture<'a, ()>;

    /// Release the retention of `cid`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Store`] on failure and [`AppError::Timeout`] when
    /// `timeout` elapses first.
    fn unpin<'a>(&'a self, cid: &'a str, timeout: Duration) -> StoreFuture<'a, ()>;

    /// Enumerate recursively pinned identifiers.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Store`] on failure and [`AppError::Timeout`] when
    /// `timeout` elapses first.
    fn list_pinned(&self, timeout: Duration) -> StoreFuture<'_, BTreeSet<String>>;

    /// Add `data` and return its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Store`] on failure and [`AppError::Timeout`] when
    /// `timeout` elapses first.
    fn add(&self, data: Vec<u8>, timeout: Duration) -> StoreFuture<'_, String>;

    /// Read the full content of `cid`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Store`] on failure and [`AppError::Timeout`] when
    /// `timeout` elapses first.
    fn read<'a>(&'a self, cid: &'a str, timeout: Duration) -> StoreFuture<'a, Vec<u8>>;
}

/// Run `operation` under `timeout`, mapping expiry to [`AppError::Timeout`].
///
/// # Errors
///
/// Returns the operation's own error, or `AppError::Timeout` naming `label`.
pub async fn bounded<T, F>(label: &str, timeout: Duration, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, operation)
        .await
        .map_err(|_| {
            AppError::Timeout(format!(
                "{label} did not finish within {}s",
                timeout.as_secs()
            ))
        })?
}
