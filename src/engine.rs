//! One running engine: child process, pipes, state machine and the
//! reader/monitor tasks that keep them in sync.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::{broadcast, mpsc, watch, Mutex as AsyncMutex, Notify};
use tokio::time::{timeout, Instant};
use tracing::Instrument;

use crate::error::{EngineError, EngineResult};
use crate::lock;
use crate::types::{
    EngineEvent, EngineIdentity, EngineState, EngineSummary, GoParams, OptionTable,
};
use crate::uci::{self, UciMessage};

/// Default deadline for the `uci`/`uciok` handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a `quit` gets before the process is force-killed.
pub const QUIT_GRACE: Duration = Duration::from_millis(500);

/// Capacity of the analysis channel and the response rendezvous.
const CHANNEL_CAPACITY: usize = 100;

/// State shared with the reader and monitor tasks.
struct EngineShared {
    id: String,
    state: Mutex<EngineState>,
    identity: Mutex<EngineIdentity>,
    options: Mutex<OptionTable>,
    /// Taken (and thereby closed) by the reader when the engine's output
    /// stream ends.
    events: Mutex<Option<broadcast::Sender<EngineEvent>>>,
    shutting_down: AtomicBool,
}

/// A UCI engine process.
///
/// All operations take `&self`; outbound writes are serialized by an
/// internal mutex so concurrent callers never interleave bytes on the pipe.
pub struct Engine {
    shared: Arc<EngineShared>,
    binary_path: PathBuf,
    /// The write mutex. `None` before `start` and after `quit`.
    stdin: AsyncMutex<Option<ChildStdin>>,
    /// Rendezvous for handshake and `isready` responses.
    responses: AsyncMutex<Option<mpsc::Receiver<UciMessage>>>,
    cancel: watch::Sender<bool>,
    exit_tx: Mutex<Option<watch::Sender<bool>>>,
    exited: watch::Receiver<bool>,
    kill: Arc<Notify>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.shared.id)
            .field("binary_path", &self.binary_path)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(id: impl Into<String>, binary_path: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (cancel, _) = watch::channel(false);
        let (exit_tx, exited) = watch::channel(false);
        Engine {
            shared: Arc::new(EngineShared {
                id: id.into(),
                state: Mutex::new(EngineState::None),
                identity: Mutex::new(EngineIdentity::default()),
                options: Mutex::new(HashMap::new()),
                events: Mutex::new(Some(events)),
                shutting_down: AtomicBool::new(false),
            }),
            binary_path: binary_path.into(),
            stdin: AsyncMutex::new(None),
            responses: AsyncMutex::new(None),
            cancel,
            exit_tx: Mutex::new(Some(exit_tx)),
            exited,
            kill: Arc::new(Notify::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    pub fn state(&self) -> EngineState {
        *lock(&self.shared.state)
    }

    /// Identity reported during the handshake; empty before `Ready`.
    pub fn identity(&self) -> EngineIdentity {
        lock(&self.shared.identity).clone()
    }

    /// Snapshot of the option table. Descriptors are copied, never aliased.
    pub fn options(&self) -> OptionTable {
        lock(&self.shared.options).clone()
    }

    pub fn summary(&self) -> EngineSummary {
        let identity = self.identity();
        EngineSummary {
            id: self.shared.id.clone(),
            name: identity.name,
            author: identity.author,
            binary_path: self.binary_path.display().to_string(),
            state: self.state().to_string(),
        }
    }

    /// Subscribes to the engine's analysis stream. The channel is bounded;
    /// when a subscriber falls behind, the oldest buffered records are
    /// dropped first.
    pub fn events(&self) -> EngineResult<broadcast::Receiver<EngineEvent>> {
        lock(&self.shared.events)
            .as_ref()
            .map(|tx| tx.subscribe())
            .ok_or(EngineError::NotRunning)
    }

    /// Launches the engine process and completes the UCI handshake.
    ///
    /// Returns once `uciok` arrived and the identity and option table are
    /// populated. A handshake failure tears the process down and leaves the
    /// engine in `Error`.
    pub async fn start(&self, handshake_timeout: Duration) -> EngineResult<()> {
        {
            let mut state = lock(&self.shared.state);
            match *state {
                EngineState::None => *state = EngineState::Starting,
                EngineState::Starting
                | EngineState::Ready
                | EngineState::Thinking
                | EngineState::Pondering => return Err(EngineError::AlreadyRunning),
                EngineState::Stopped | EngineState::Error => {
                    return Err(EngineError::IllegalState {
                        expected: "none",
                        actual: *state,
                    })
                }
            }
        }

        tracing::info!(
            engine = %self.shared.id,
            path = %self.binary_path.display(),
            "starting engine process"
        );

        let mut command = tokio::process::Command::new(&self.binary_path);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.set_state(EngineState::Error);
                return Err(EngineError::SpawnFailed(e));
            }
        };

        let stdin = match child.stdin.take() {
            Some(stdin) => stdin,
            None => {
                self.set_state(EngineState::Error);
                return Err(EngineError::SpawnFailed(io::Error::other(
                    "child stdin not captured",
                )));
            }
        };
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                self.set_state(EngineState::Error);
                return Err(EngineError::SpawnFailed(io::Error::other(
                    "child stdout not captured",
                )));
            }
        };

        *self.stdin.lock().await = Some(stdin);
        let (resp_tx, resp_rx) = mpsc::channel(CHANNEL_CAPACITY);
        *self.responses.lock().await = Some(resp_rx);

        let events_tx = match lock(&self.shared.events).as_ref() {
            Some(tx) => tx.clone(),
            None => return Err(EngineError::NotRunning),
        };

        let span = tracing::info_span!("engine", id = %self.shared.id);
        tokio::spawn(
            read_loop(
                Arc::clone(&self.shared),
                stdout,
                resp_tx,
                events_tx,
                self.cancel.subscribe(),
            )
            .instrument(span.clone()),
        );

        if let Some(exit_tx) = lock(&self.exit_tx).take() {
            tokio::spawn(
                monitor(
                    Arc::clone(&self.shared),
                    child,
                    exit_tx,
                    Arc::clone(&self.kill),
                )
                .instrument(span),
            );
        }

        if let Err(e) = self.send_raw("uci").await {
            self.teardown(EngineState::Error).await;
            return Err(e);
        }

        match self.wait_handshake(handshake_timeout).await {
            Ok(()) => {
                self.set_state(EngineState::Ready);
                tracing::info!(
                    engine = %self.shared.id,
                    name = %lock(&self.shared.identity).name,
                    options = lock(&self.shared.options).len(),
                    "handshake complete"
                );
                Ok(())
            }
            Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
            Err(e) => {
                self.teardown(EngineState::Error).await;
                Err(e)
            }
        }
    }

    /// Sets a UCI option. Unknown names are still transmitted (engines may
    /// accept undeclared vendor options) but create no descriptor entry.
    pub async fn set_option(&self, name: &str, value: &str) -> EngineResult<()> {
        let state = self.state();
        if !matches!(
            state,
            EngineState::Ready | EngineState::Thinking | EngineState::Pondering
        ) {
            return Err(EngineError::IllegalState {
                expected: "ready",
                actual: state,
            });
        }
        self.send_raw(&uci::set_option_command(name, value)).await?;
        if let Some(opt) = lock(&self.shared.options).get_mut(name) {
            opt.value = value.to_string();
        }
        Ok(())
    }

    /// Sends a `position` command. The descriptor is opaque; an empty string
    /// selects the starting position.
    pub async fn set_position(&self, descriptor: &str, moves: &[String]) -> EngineResult<()> {
        let state = self.state();
        if state != EngineState::Ready {
            return Err(EngineError::IllegalState {
                expected: "ready",
                actual: state,
            });
        }
        self.send_raw(&uci::position_command(descriptor, moves)).await
    }

    /// Starts a search. The engine stays `Thinking` (or `Pondering`) until
    /// its `bestmove` arrives.
    pub async fn go(&self, params: &GoParams) -> EngineResult<()> {
        {
            let mut state = lock(&self.shared.state);
            if *state != EngineState::Ready {
                return Err(EngineError::IllegalState {
                    expected: "ready",
                    actual: *state,
                });
            }
            *state = if params.ponder {
                EngineState::Pondering
            } else {
                EngineState::Thinking
            };
        }

        if let Err(e) = self.send_raw(&uci::go_command(params)).await {
            // The search never started; undo the transition.
            let mut state = lock(&self.shared.state);
            if state.is_searching() {
                *state = EngineState::Ready;
            }
            return Err(e);
        }
        Ok(())
    }

    /// Asks a searching engine to stop. Does not wait for the `bestmove`;
    /// the state changes only once it arrives.
    pub async fn stop_search(&self) -> EngineResult<()> {
        if !self.state().is_searching() {
            return Ok(());
        }
        self.send_raw("stop").await
    }

    /// Sends `isready` and waits for `readyok`. Analysis lines received in
    /// the meantime flow to the analysis channel as usual.
    pub async fn is_ready(&self, limit: Duration) -> EngineResult<()> {
        let state = self.state();
        if !matches!(
            state,
            EngineState::Ready | EngineState::Thinking | EngineState::Pondering
        ) {
            return Err(EngineError::NotRunning);
        }
        self.send_raw("isready").await?;

        let deadline = Instant::now() + limit;
        let mut guard = self.responses.lock().await;
        let responses = guard.as_mut().ok_or(EngineError::NotRunning)?;
        let mut cancel = self.cancel.subscribe();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(EngineError::IsReadyTimeout);
            }
            tokio::select! {
                _ = cancel.changed() => return Err(EngineError::Cancelled),
                msg = timeout(remaining, responses.recv()) => match msg {
                    Err(_) => return Err(EngineError::IsReadyTimeout),
                    Ok(None) => {
                        return Err(EngineError::UnexpectedExit(
                            "engine closed while waiting for readyok".into(),
                        ))
                    }
                    Ok(Some(UciMessage::ReadyOk)) => return Ok(()),
                    Ok(Some(other)) => {
                        tracing::trace!("skipping {other:?} while waiting for readyok");
                    }
                },
            }
        }
    }

    /// Tells the engine the next search belongs to a new game. Never sent
    /// implicitly.
    pub async fn new_game(&self) -> EngineResult<()> {
        let state = self.state();
        if state != EngineState::Ready {
            return Err(EngineError::IllegalState {
                expected: "ready",
                actual: state,
            });
        }
        self.send_raw("ucinewgame").await
    }

    /// Shuts the engine down: `quit`, a grace period, then a kill. Returns
    /// once the process has been reaped. No-op in terminal states.
    pub async fn stop(&self) -> EngineResult<()> {
        match self.state() {
            EngineState::None | EngineState::Stopped | EngineState::Error => return Ok(()),
            _ => {}
        }
        tracing::info!(engine = %self.shared.id, "stopping engine");
        self.teardown(EngineState::Stopped).await;
        Ok(())
    }

    fn set_state(&self, state: EngineState) {
        *lock(&self.shared.state) = state;
    }

    /// Writes one command line. The mutex makes the outbound stream a strict
    /// linearization of caller order.
    async fn send_raw(&self, command: &str) -> EngineResult<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(EngineError::NotRunning)?;
        tracing::trace!("UCI >> {command}");
        stdin
            .write_all(command.as_bytes())
            .await
            .map_err(EngineError::WriteFailed)?;
        stdin.write_all(b"\n").await.map_err(EngineError::WriteFailed)?;
        stdin.flush().await.map_err(EngineError::WriteFailed)?;
        Ok(())
    }

    async fn wait_handshake(&self, limit: Duration) -> EngineResult<()> {
        let deadline = Instant::now() + limit;
        let mut guard = self.responses.lock().await;
        let responses = guard.as_mut().ok_or(EngineError::NotRunning)?;
        let mut cancel = self.cancel.subscribe();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(EngineError::HandshakeTimeout);
            }
            let msg = tokio::select! {
                _ = cancel.changed() => return Err(EngineError::Cancelled),
                msg = timeout(remaining, responses.recv()) => match msg {
                    Err(_) => return Err(EngineError::HandshakeTimeout),
                    Ok(None) => {
                        return Err(EngineError::UnexpectedExit(
                            "engine closed before uciok".into(),
                        ))
                    }
                    Ok(Some(msg)) => msg,
                },
            };
            match msg {
                UciMessage::IdName(name) => {
                    tracing::debug!("engine identified as {name}");
                    lock(&self.shared.identity).name = name;
                }
                UciMessage::IdAuthor(author) => {
                    lock(&self.shared.identity).author = author;
                }
                UciMessage::Option(opt) => {
                    lock(&self.shared.options).insert(opt.name.clone(), opt);
                }
                UciMessage::UciOk => return Ok(()),
                _ => {}
            }
        }
    }

    /// Common shutdown path. `quit` is the last command ever written; the
    /// stdin handle is dropped under the write mutex so nothing can follow.
    async fn teardown(&self, final_state: EngineState) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        {
            let mut stdin = self.stdin.lock().await;
            if let Some(pipe) = stdin.as_mut() {
                let _ = pipe.write_all(b"quit\n").await;
                let _ = pipe.flush().await;
            }
            *stdin = None;
        }

        let mut exited = self.exited.clone();
        if !*exited.borrow_and_update() {
            if timeout(QUIT_GRACE, exited.changed()).await.is_err() {
                tracing::warn!(
                    engine = %self.shared.id,
                    "engine did not exit within grace period, killing"
                );
                self.kill.notify_one();
                let _ = exited.changed().await;
            }
        }

        let _ = self.cancel.send(true);
        self.set_state(final_state);
    }
}

/// Reads the engine's output line by line and routes each parsed message:
/// handshake and fence responses to the rendezvous, analysis and bestmove
/// records to the analysis channel.
async fn read_loop(
    shared: Arc<EngineShared>,
    stdout: ChildStdout,
    responses: mpsc::Sender<UciMessage>,
    events: broadcast::Sender<EngineEvent>,
    mut cancel: watch::Receiver<bool>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let next = tokio::select! {
            _ = cancel.changed() => break,
            next = lines.next_line() => next,
        };
        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::debug!("engine stdout closed");
                break;
            }
            Err(e) => {
                tracing::error!("error reading engine stdout: {e}");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        tracing::trace!("UCI << {line}");

        match uci::parse_line(line) {
            UciMessage::Info(mut info) => {
                info.engine_id = shared.id.clone();
                let _ = events.send(EngineEvent::Analysis(info));
            }
            UciMessage::BestMove(best) => {
                {
                    let mut state = lock(&shared.state);
                    if state.is_searching() {
                        *state = EngineState::Ready;
                    }
                }
                tracing::debug!(mv = %best.mv, "bestmove received");
                let _ = events.send(EngineEvent::BestMove {
                    engine_id: shared.id.clone(),
                    best,
                });
            }
            UciMessage::Empty => {}
            UciMessage::Unknown(raw) => {
                tracing::trace!("ignoring unrecognized line: {raw}");
            }
            msg => {
                // Handshake or fence response. Nobody waiting means the
                // message is stale; dropping it is fine.
                if responses.try_send(msg).is_err() {
                    tracing::trace!("response rendezvous full, dropping message");
                }
            }
        }
    }

    // Drop the sender so subscribers drain what is buffered and then
    // observe the closed channel.
    lock(&shared.events).take();
    tracing::debug!("reader task exiting");
}

/// Waits for the child to exit. An exit outside an orderly shutdown flips
/// the engine to `Error`.
async fn monitor(
    shared: Arc<EngineShared>,
    mut child: Child,
    exit_tx: watch::Sender<bool>,
    kill: Arc<Notify>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill.notified() => {
            let _ = child.start_kill();
            child.wait().await
        }
    };

    let expected = shared.shutting_down.load(Ordering::SeqCst);
    match status {
        Ok(status) if expected => {
            tracing::info!(%status, "engine exited");
        }
        Ok(status) => {
            tracing::error!(%status, "engine exited unexpectedly");
            *lock(&shared.state) = EngineState::Error;
        }
        Err(e) => {
            tracing::error!("failed to await engine exit: {e}");
            if !expected {
                *lock(&shared.state) = EngineState::Error;
            }
        }
    }

    let _ = exit_tx.send(true);
}
