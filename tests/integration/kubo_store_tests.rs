//! Integration tests for the Kubo CLI adapter, driven by a fake `ipfs`
//! shell script.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use serial_test::serial;
use tempfile::TempDir;

use provider_agent::config::StoreConfig;
use provider_agent::store::kubo::KuboStore;
use provider_agent::store::ContentStore;
use provider_agent::AppError;

const BUDGET: Duration = Duration::from_secs(5);

/// Stand-in for `ipfs` that logs its arguments and answers by subcommand.
const FAKE_IPFS: &str = r#"#!/bin/sh
echo "$*" >> "$(dirname "$0")/calls.log"
case "$1" in
  id) echo "12D3KooWFakePeer" ;;
  refs) exit 0 ;;
  pin)
    case "$2" in
      add)
        if [ "$3" = "bafySlow" ]; then sleep 10; fi
        if [ "$3" = "bafyBad" ]; then echo "Error: failed to pin: not found" >&2; exit 1; fi
        echo "pinned $3 recursively" ;;
      rm)
        if [ "$3" = "bafyMissing" ]; then echo "Error: not pinned or pinned indirectly" >&2; exit 1; fi
        echo "unpinned $3" ;;
      ls) printf 'bafyA recursive\nbafyB recursive\n' ;;
    esac ;;
  repo)
    if [ -f "$(dirname "$0")/slow_gc" ]; then sleep 10; fi
    echo "Error: gc failed" >&2; exit 1 ;;
  add)
    if [ "$2" = "--pin=false" ]; then echo "bafyUnpinned"; else echo "bafyPinned"; fi ;;
  cat) printf 'hello' ;;
  *) echo "unknown command" >&2; exit 2 ;;
esac
"#;

fn install_fake_ipfs(dir: &Path) -> String {
    let path = dir.join("ipfs");
    std::fs::write(&path, FAKE_IPFS).expect("write script");
    let mut permissions = std::fs::metadata(&path).expect("metadata").permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).expect("chmod");
    path.to_str().expect("utf8 path").to_owned()
}

fn fake_store(configure: impl FnOnce(&mut StoreConfig)) -> (TempDir, KuboStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = StoreConfig {
        ipfs_bin: install_fake_ipfs(dir.path()),
        ..StoreConfig::default()
    };
    configure(&mut config);
    (dir, KuboStore::new(config))
}

fn calls(dir: &TempDir) -> Vec<String> {
    std::fs::read_to_string(dir.path().join("calls.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_owned)
        .collect()
}

#[tokio::test]
#[serial]
async fn peer_id_is_trimmed_stdout() {
    let (_dir, store) = fake_store(|_| {});
    assert_eq!(store.peer_id(BUDGET).await.expect("peer id"), "12D3KooWFakePeer");
}

#[tokio::test]
#[serial]
async fn missing_binary_is_an_identity_error() {
    let store = KuboStore::new(StoreConfig {
        ipfs_bin: "/nonexistent/bin/ipfs".into(),
        ..StoreConfig::default()
    });
    let err = store.peer_id(BUDGET).await.expect_err("no binary");
    assert!(matches!(err, AppError::Identity(_)));
}

#[tokio::test]
#[serial]
async fn pin_runs_pin_add() {
    let (dir, store) = fake_store(|_| {});
    store.pin("bafyA", BUDGET).await.expect("pin");
    assert_eq!(calls(&dir), vec!["pin add bafyA".to_owned()]);
}

#[tokio::test]
#[serial]
async fn prefetch_runs_before_pin() {
    let (dir, store) = fake_store(|config| config.prefetch_before_pin = true);
    store.pin("bafyA", BUDGET).await.expect("pin");
    assert_eq!(
        calls(&dir),
        vec!["refs -r bafyA".to_owned(), "pin add bafyA".to_owned()]
    );
}

/// Failures carry the CLI's stderr as one line.
#[tokio::test]
#[serial]
async fn pin_failure_carries_stderr() {
    let (_dir, store) = fake_store(|_| {});
    let err = store.pin("bafyBad", BUDGET).await.expect_err("pin fails");
    assert!(matches!(err, AppError::Store(ref msg) if msg == "Error: failed to pin: not found"));
}

/// A pin that outlives its budget fails with a timeout.
#[tokio::test]
#[serial]
async fn slow_pin_times_out() {
    let (_dir, store) = fake_store(|_| {});
    let started = std::time::Instant::now();
    let err = store
        .pin("bafySlow", Duration::from_millis(300))
        .await
        .expect_err("pin times out");
    assert!(matches!(err, AppError::Timeout(_)));
    assert!(started.elapsed() < Duration::from_secs(5));
}

/// Identifiers that look like options never reach the CLI.
#[tokio::test]
#[serial]
async fn option_like_cid_is_rejected() {
    let (dir, store) = fake_store(|_| {});
    let err = store.pin("--help", BUDGET).await.expect_err("rejected");
    assert!(matches!(err, AppError::Store(_)));
    assert!(store.read("bafy A", BUDGET).await.is_err());
    assert!(calls(&dir).is_empty());
}

#[tokio::test]
#[serial]
async fn unpin_failure_is_reported() {
    let (_dir, store) = fake_store(|_| {});
    store.unpin("bafyA", BUDGET).await.expect("unpin");
    let err = store.unpin("bafyMissing", BUDGET).await.expect_err("not pinned");
    assert!(matches!(err, AppError::Store(ref msg) if msg.contains("not pinned")));
}

/// Garbage collection failure after an unpin does not fail the unpin.
#[tokio::test]
#[serial]
async fn gc_failure_does_not_fail_unpin() {
    let (dir, store) = fake_store(|config| config.gc_after_unpin = true);
    store.unpin("bafyA", BUDGET).await.expect("unpin still succeeds");
    assert_eq!(
        calls(&dir),
        vec!["pin rm bafyA".to_owned(), "repo gc --quiet".to_owned()]
    );
}

/// A slow collection is cut off at the unpin budget, and the unpin still
/// succeeds because the pin was already removed.
#[tokio::test]
#[serial]
async fn gc_after_unpin_shares_the_unpin_budget() {
    let (dir, store) = fake_store(|config| config.gc_after_unpin = true);
    std::fs::write(dir.path().join("slow_gc"), b"").expect("mark gc slow");

    let budget = Duration::from_secs(1);
    let started = std::time::Instant::now();
    store.unpin("bafyA", budget).await.expect("unpin still succeeds");
    let elapsed = started.elapsed();

    assert!(
        elapsed < budget + Duration::from_millis(500),
        "unpin took {elapsed:?} against a {budget:?} budget"
    );
    assert_eq!(
        calls(&dir),
        vec!["pin rm bafyA".to_owned(), "repo gc --quiet".to_owned()]
    );
}

#[tokio::test]
#[serial]
async fn list_pinned_parses_recursive_pins() {
    let (dir, store) = fake_store(|_| {});
    let pins = store.list_pinned(BUDGET).await.expect("list");
    assert_eq!(
        pins.into_iter().collect::<Vec<_>>(),
        vec!["bafyA".to_owned(), "bafyB".to_owned()]
    );
    assert_eq!(calls(&dir), vec!["pin ls --type=recursive".to_owned()]);
}

/// Uploads are not pinned unless configured.
#[tokio::test]
#[serial]
async fn add_respects_pin_on_add() {
    let (_dir, store) = fake_store(|_| {});
    assert_eq!(store.add(b"data".to_vec(), BUDGET).await.expect("add"), "bafyUnpinned");

    let (_dir, store) = fake_store(|config| config.pin_on_add = true);
    assert_eq!(store.add(b"data".to_vec(), BUDGET).await.expect("add"), "bafyPinned");
}

#[tokio::test]
#[serial]
async fn read_returns_raw_bytes() {
    let (_dir, store) = fake_store(|_| {});
    assert_eq!(store.read("bafyA", BUDGET).await.expect("cat"), b"hello".to_vec());
}
