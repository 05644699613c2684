//! The engine manager: a named set of engines whose analysis streams are
//! merged behind one rate-limited sink.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, watch, RwLock};
use tracing::Instrument;

use crate::engine::{Engine, HANDSHAKE_TIMEOUT};
use crate::error::{EngineError, EngineResult};
use crate::lock;
use crate::types::{AnalysisInfo, EngineEvent, EngineState, EngineSummary, GoParams};

/// Fallback emission rate when callers pass a non-positive value.
const DEFAULT_RATE_HZ: u32 = 20;

/// Records at or beyond this depth always reach the sink.
const ALWAYS_EMIT_DEPTH: u32 = 20;

/// Callback receiving the merged analysis stream. Invoked from background
/// tasks, possibly concurrently.
pub type AnalysisSink = Arc<dyn Fn(EngineEvent) + Send + Sync>;

/// Manages multiple concurrent engines. Cheap to clone; clones share the
/// same engine set and sink.
#[derive(Clone)]
pub struct EngineManager {
    shared: Arc<ManagerShared>,
}

struct ManagerShared {
    engines: RwLock<HashMap<String, Arc<Engine>>>,
    sink: Mutex<Option<AnalysisSink>>,
    throttle: Mutex<Throttle>,
    cancel: watch::Sender<bool>,
}

impl Default for EngineManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineManager {
    pub fn new() -> Self {
        let (cancel, _) = watch::channel(false);
        EngineManager {
            shared: Arc::new(ManagerShared {
                engines: RwLock::new(HashMap::new()),
                sink: Mutex::new(None),
                throttle: Mutex::new(Throttle::new(DEFAULT_RATE_HZ)),
                cancel,
            }),
        }
    }

    /// Installs the sink for merged analysis records, replacing any previous
    /// one. Replacement is atomic with respect to invocation.
    pub fn set_analysis_sink(&self, sink: impl Fn(EngineEvent) + Send + Sync + 'static) {
        *lock(&self.shared.sink) = Some(Arc::new(sink));
    }

    /// Sets the minimum interval between emissions per engine. Non-positive
    /// rates select the 20 Hz default.
    pub fn set_rate_limit(&self, hz: i32) {
        let hz = if hz <= 0 { DEFAULT_RATE_HZ } else { hz as u32 };
        lock(&self.shared.throttle).interval = Duration::from_secs(1) / hz;
    }

    /// Adds an engine under a caller-chosen id.
    pub async fn register(&self, id: &str, binary_path: impl Into<PathBuf>) -> EngineResult<()> {
        let mut engines = self.shared.engines.write().await;
        if engines.contains_key(id) {
            return Err(EngineError::DuplicateId(id.to_string()));
        }
        engines.insert(id.to_string(), Arc::new(Engine::new(id, binary_path)));
        tracing::info!(engine = id, "engine registered");
        Ok(())
    }

    /// Removes an engine, stopping it first if it is live. Returns once the
    /// process has been reaped.
    pub async fn unregister(&self, id: &str) -> EngineResult<()> {
        let engine = self
            .shared
            .engines
            .write()
            .await
            .remove(id)
            .ok_or_else(|| EngineError::NotRegistered(id.to_string()))?;
        engine.stop().await?;
        lock(&self.shared.throttle).last_emit.remove(id);
        tracing::info!(engine = id, "engine unregistered");
        Ok(())
    }

    /// Direct access to one engine for session-level operations.
    pub async fn engine(&self, id: &str) -> EngineResult<Arc<Engine>> {
        self.shared
            .engines
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotRegistered(id.to_string()))
    }

    pub async fn get(&self, id: &str) -> EngineResult<EngineSummary> {
        Ok(self.engine(id).await?.summary())
    }

    pub async fn list(&self) -> Vec<EngineSummary> {
        self.shared
            .engines
            .read()
            .await
            .values()
            .map(|engine| engine.summary())
            .collect()
    }

    /// Starts an engine and begins forwarding its analysis stream to the
    /// sink.
    pub async fn start(&self, id: &str) -> EngineResult<()> {
        let engine = self.engine(id).await?;
        // Subscribe before the handshake so no early record is missed.
        let events = engine.events()?;
        engine.start(HANDSHAKE_TIMEOUT).await?;

        let shared = Arc::clone(&self.shared);
        let engine_id = id.to_string();
        let span = tracing::info_span!("forwarder", engine = id);
        tokio::spawn(forward_events(shared, engine_id, events).instrument(span));
        Ok(())
    }

    pub async fn stop(&self, id: &str) -> EngineResult<()> {
        self.engine(id).await?.stop().await
    }

    /// Positions and starts the given engines, in order. The first failure
    /// returns immediately; engines that already received their `go` keep
    /// searching until told otherwise.
    pub async fn start_analysis(
        &self,
        descriptor: &str,
        moves: &[String],
        ids: &[String],
        params: &GoParams,
    ) -> EngineResult<()> {
        for id in ids {
            let engine = self.engine(id).await?;
            let state = engine.state();
            if state != EngineState::Ready {
                return Err(EngineError::IllegalState {
                    expected: "ready",
                    actual: state,
                });
            }
            engine.set_position(descriptor, moves).await?;
            engine.go(params).await?;
        }
        Ok(())
    }

    /// Stops searching on the given engines. Best effort: every engine is
    /// attempted and the last error, if any, is returned.
    pub async fn stop_analysis(&self, ids: &[String]) -> EngineResult<()> {
        let mut last_err = None;
        for id in ids {
            match self.engine(id).await {
                Ok(engine) => {
                    if let Err(e) = engine.stop_search().await {
                        last_err = Some(e);
                    }
                }
                Err(e) => last_err = Some(e),
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stops every live engine.
    pub async fn stop_all(&self) {
        let engines: Vec<Arc<Engine>> =
            self.shared.engines.read().await.values().cloned().collect();
        for engine in engines {
            let _ = engine.stop().await;
        }
    }

    /// Stops all engines, cancels the forwarder tasks and drops the sink.
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        tracing::info!("shutting down engine manager");
        self.stop_all().await;
        let _ = self.shared.cancel.send(true);
        *lock(&self.shared.sink) = None;
    }
}

/// Drains one engine's analysis channel into the sink, subject to the rate
/// limiter. Exits when the channel closes, the engine is unregistered, or
/// the manager shuts down.
async fn forward_events(
    shared: Arc<ManagerShared>,
    engine_id: String,
    mut events: broadcast::Receiver<EngineEvent>,
) {
    let mut cancel = shared.cancel.subscribe();
    loop {
        let event = tokio::select! {
            _ = cancel.changed() => break,
            event = events.recv() => match event {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "analysis stream lagged, oldest records dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        if !shared.engines.read().await.contains_key(&engine_id) {
            break;
        }

        if let EngineEvent::Analysis(ref info) = event {
            if !lock(&shared.throttle).should_emit(info) {
                continue;
            }
        }

        let sink = lock(&shared.sink).clone();
        if let Some(sink) = sink {
            sink(event);
        }
    }
    tracing::debug!("forwarder exiting");
}

/// Per-engine emission throttle. A record goes through on the first
/// emission, once the interval has elapsed, at depth ≥ 20, or when it
/// carries no pv (status updates and terminal markers are cheap).
struct Throttle {
    interval: Duration,
    last_emit: HashMap<String, Instant>,
}

impl Throttle {
    fn new(hz: u32) -> Self {
        Throttle {
            interval: Duration::from_secs(1) / hz,
            last_emit: HashMap::new(),
        }
    }

    fn should_emit(&mut self, info: &AnalysisInfo) -> bool {
        let now = Instant::now();
        let emit = match self.last_emit.get(&info.engine_id) {
            None => true,
            Some(last) => {
                now.duration_since(*last) >= self.interval
                    || info.depth >= ALWAYS_EMIT_DEPTH
                    || info.pv.is_empty()
            }
        };
        if emit {
            self.last_emit.insert(info.engine_id.clone(), now);
        }
        emit
    }
}


#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_util::{stub_engine, RESPONSIVE, SEARCH_UNTIL_STOP};
    use crate::types::BestMove;
    use tokio::time::{sleep, timeout};

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|id| id.to_string()).collect()
    }

    /// Collects sink events behind a mutex for later inspection.
    fn capturing_sink(manager: &EngineManager) -> Arc<Mutex<Vec<EngineEvent>>> {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink_copy = Arc::clone(&captured);
        manager.set_analysis_sink(move |event| {
            lock(&sink_copy).push(event);
        });
        captured
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        let result = timeout(Duration::from_secs(5), async {
            while !condition() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(result.is_ok(), "condition not reached in time");
    }

    #[tokio::test]
    async fn register_rejects_duplicates() {
        let stub = stub_engine(RESPONSIVE);
        let manager = EngineManager::new();
        manager.register("sf", stub.path()).await.unwrap();
        let err = manager.register("sf", stub.path()).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateId(id) if id == "sf"));
    }

    #[tokio::test]
    async fn unknown_ids_are_reported() {
        let manager = EngineManager::new();
        assert!(matches!(
            manager.unregister("ghost").await.unwrap_err(),
            EngineError::NotRegistered(_)
        ));
        assert!(matches!(
            manager.get("ghost").await.unwrap_err(),
            EngineError::NotRegistered(_)
        ));
        assert!(matches!(
            manager.start("ghost").await.unwrap_err(),
            EngineError::NotRegistered(_)
        ));
    }

    #[tokio::test]
    async fn list_reports_summaries() {
        let stub = stub_engine(RESPONSIVE);
        let manager = EngineManager::new();
        manager.register("one", stub.path()).await.unwrap();
        manager.register("two", stub.path()).await.unwrap();

        let mut listed = manager.list().await;
        listed.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "one");
        assert_eq!(listed[0].state, "none");
        assert_eq!(listed[0].binary_path, stub.path().display().to_string());

        manager.start("one").await.unwrap();
        let summary = manager.get("one").await.unwrap();
        assert_eq!(summary.state, "ready");
        assert_eq!(summary.name, "Stub");
        assert_eq!(summary.author, "Tester");

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn analysis_flows_to_the_sink() {
        let stub = stub_engine(RESPONSIVE);
        let manager = EngineManager::new();
        let captured = capturing_sink(&manager);
        manager.set_rate_limit(1000);

        manager.register("sf", stub.path()).await.unwrap();
        manager.start("sf").await.unwrap();
        manager
            .start_analysis(
                "",
                &["e2e4".to_string()],
                &ids(&["sf"]),
                &GoParams {
                    depth: Some(5),
                    ..GoParams::default()
                },
            )
            .await
            .unwrap();

        wait_until(|| {
            lock(&captured)
                .iter()
                .any(|event| matches!(event, EngineEvent::BestMove { .. }))
        })
        .await;

        let events = lock(&captured);
        let analysis = events.iter().find_map(|event| match event {
            EngineEvent::Analysis(info) => Some(info.clone()),
            _ => None,
        });
        let info = analysis.expect("at least one analysis record reached the sink");
        assert_eq!(info.engine_id, "sf");
        assert!(info.depth > 0);

        let best = events.iter().find_map(|event| match event {
            EngineEvent::BestMove { engine_id, best } => Some((engine_id.clone(), best.clone())),
            _ => None,
        });
        assert_eq!(
            best,
            Some((
                "sf".to_string(),
                BestMove {
                    mv: "e2e4".to_string(),
                    ponder: Some("e7e5".to_string()),
                }
            ))
        );
        drop(events);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn start_analysis_fails_fast_and_leaves_started_engines_running() {
        let searching = stub_engine(SEARCH_UNTIL_STOP);
        let manager = EngineManager::new();
        manager.register("live", searching.path()).await.unwrap();
        manager.register("cold", searching.path()).await.unwrap();
        manager.start("live").await.unwrap();

        // "cold" was never started, so the batch fails after "live" already
        // received its go.
        let err = manager
            .start_analysis(
                "",
                &[],
                &ids(&["live", "cold"]),
                &GoParams {
                    infinite: true,
                    ..GoParams::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::IllegalState { .. }));
        assert_eq!(manager.engine("live").await.unwrap().state(), EngineState::Thinking);

        manager.stop_analysis(&ids(&["live"])).await.unwrap();
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn stop_analysis_collects_the_last_error() {
        let stub = stub_engine(RESPONSIVE);
        let manager = EngineManager::new();
        manager.register("sf", stub.path()).await.unwrap();
        manager.start("sf").await.unwrap();

        let err = manager
            .stop_analysis(&ids(&["sf", "ghost"]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotRegistered(id) if id == "ghost"));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn unregister_stops_and_removes() {
        let stub = stub_engine(RESPONSIVE);
        let manager = EngineManager::new();
        manager.register("sf", stub.path()).await.unwrap();
        manager.start("sf").await.unwrap();

        manager.unregister("sf").await.unwrap();
        assert!(manager.list().await.is_empty());
        assert!(matches!(
            manager.engine("sf").await.unwrap_err(),
            EngineError::NotRegistered(_)
        ));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_stops_everything() {
        let stub = stub_engine(RESPONSIVE);
        let manager = EngineManager::new();
        manager.register("one", stub.path()).await.unwrap();
        manager.register("two", stub.path()).await.unwrap();
        manager.start("one").await.unwrap();
        manager.start("two").await.unwrap();

        manager.shutdown().await;
        for summary in manager.list().await {
            assert!(
                summary.state == "stopped" || summary.state == "error",
                "engine {} still {}",
                summary.id,
                summary.state
            );
        }

        manager.shutdown().await;
    }
}
