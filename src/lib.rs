//! Engine-control core for UCI chess engines.
//!
//! Launches engines as child processes, conducts the `uci`/`uciok`
//! handshake, configures options, drives analysis, and multiplexes the
//! streaming results of many engines into a single rate-limited sink.
//!
//! The three layers, leaves first:
//!
//! - [`uci`] — the protocol codec: one line in, one [`uci::UciMessage`] out;
//!   outbound command builders. Pure functions.
//! - [`Engine`] — one running engine: child process, option table, state
//!   machine, reader and monitor tasks.
//! - [`EngineManager`] — a named set of engines whose analysis streams fan
//!   in to one sink callback.
//!
//! Position descriptors and moves are opaque strings throughout; this crate
//! speaks the protocol and leaves the chess to its callers.

mod engine;
mod error;
mod manager;
pub mod types;
pub mod uci;

#[cfg(all(test, unix))]
mod test_util;

pub use engine::{Engine, HANDSHAKE_TIMEOUT, QUIT_GRACE};
pub use error::{EngineError, EngineResult};
pub use manager::{AnalysisSink, EngineManager};
pub use types::{
    AnalysisInfo, BestMove, EngineEvent, EngineIdentity, EngineState, EngineSummary, GoParams,
    OptionKind, OptionTable, Score, ScoreValue, UciOption,
};

/// Locks a mutex, recovering the guard if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
