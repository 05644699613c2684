//! Shell-script stub engines for exercising the process plumbing without a
//! real chess engine installed.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// A well-behaved engine: completes the handshake, answers `isready`, and
/// responds to `go` with one analysis line and a bestmove.
pub(crate) const RESPONSIVE: &str = r#"
while read line; do
  set -- $line
  case "$1" in
    uci)
      echo "id name Stub"
      echo "id author Tester"
      echo "option name Hash type spin default 16 min 1 max 1024"
      echo "option name Clear Hash type button"
      echo "uciok"
      ;;
    isready)
      echo "readyok"
      ;;
    go)
      echo "info depth 5 seldepth 7 score cp 35 nodes 1000 nps 10000 time 10 pv e2e4 e7e5"
      echo "bestmove e2e4 ponder e7e5"
      ;;
    quit)
      exit 0
      ;;
  esac
done
"#;

/// Searches until told to stop, like a real engine on `go infinite`.
pub(crate) const SEARCH_UNTIL_STOP: &str = r#"
while read line; do
  set -- $line
  case "$1" in
    uci)
      echo "id name Stub"
      echo "id author Tester"
      echo "uciok"
      ;;
    isready)
      echo "readyok"
      ;;
    go)
      echo "info depth 3 score cp 21 pv d2d4"
      ;;
    stop)
      echo "bestmove d2d4"
      ;;
    quit)
      exit 0
      ;;
  esac
done
"#;

/// Dies mid-search without a bestmove.
pub(crate) const CRASH_ON_GO: &str = r#"
while read line; do
  set -- $line
  case "$1" in
    uci)
      echo "id name Stub"
      echo "id author Tester"
      echo "uciok"
      ;;
    isready)
      echo "readyok"
      ;;
    go)
      echo "info depth 1 score cp 3 pv g1f3"
      exit 7
      ;;
    quit)
      exit 0
      ;;
  esac
done
"#;

/// Consumes input and never says anything.
pub(crate) const SILENT: &str = r#"
while read line; do
  :
done
"#;

/// Handshakes normally but dawdles on `quit`, forcing the kill path.
pub(crate) const IGNORES_QUIT: &str = r#"
while read line; do
  set -- $line
  case "$1" in
    uci)
      echo "id name Stub"
      echo "id author Tester"
      echo "uciok"
      ;;
    quit)
      sleep 5
      exit 0
      ;;
  esac
done
"#;

pub(crate) struct StubEngine {
    _dir: tempfile::TempDir,
    path: PathBuf,
}

impl StubEngine {
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

/// Writes `behavior` to an executable `/bin/sh` script in a scratch dir.
pub(crate) fn stub_engine(behavior: &str) -> StubEngine {
    init_tracing();
    let dir = tempfile::tempdir().expect("create temp dir for stub engine");
    let path = dir.path().join("stub-engine");
    fs::write(&path, format!("#!/bin/sh\n{behavior}")).expect("write stub engine script");
    let mut permissions = fs::metadata(&path)
        .expect("stat stub engine script")
        .permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(&path, permissions).expect("mark stub engine executable");
    StubEngine { _dir: dir, path }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
