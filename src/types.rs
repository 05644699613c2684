//! Value types shared between the protocol codec, engine sessions and the
//! manager.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Lifecycle state of an engine process.
///
/// `Stopped` and `Error` are terminal: restarting an engine requires a fresh
/// [`Engine`](crate::Engine) value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    None,
    Starting,
    Ready,
    Thinking,
    Pondering,
    Stopped,
    Error,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::None => "none",
            EngineState::Starting => "starting",
            EngineState::Ready => "ready",
            EngineState::Thinking => "thinking",
            EngineState::Pondering => "pondering",
            EngineState::Stopped => "stopped",
            EngineState::Error => "error",
        }
    }

    /// True while the child process is expected to be alive.
    pub fn is_live(&self) -> bool {
        !matches!(
            self,
            EngineState::None | EngineState::Stopped | EngineState::Error
        )
    }

    pub fn is_searching(&self) -> bool {
        matches!(self, EngineState::Thinking | EngineState::Pondering)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five UCI option kinds. Unrecognized `type` tokens degrade to `String`
/// so that vendor extensions still produce a usable descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Spin,
    Check,
    Combo,
    String,
    Button,
}

impl OptionKind {
    pub(crate) fn from_token(token: &str) -> Self {
        match token {
            "spin" => OptionKind::Spin,
            "check" => OptionKind::Check,
            "combo" => OptionKind::Combo,
            "button" => OptionKind::Button,
            _ => OptionKind::String,
        }
    }
}

/// A configurable engine option, as declared during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UciOption {
    pub name: String,
    pub kind: OptionKind,
    pub default_value: String,
    /// Present only for `Spin` options.
    pub min: Option<i64>,
    pub max: Option<i64>,
    /// Present only for `Combo` options, in declaration order.
    pub choices: Vec<String>,
    /// Current value; starts out equal to `default_value`.
    pub value: String,
}

/// Engine evaluation, from the side to move's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreValue {
    /// Hundredths of a pawn.
    Centipawns(i32),
    /// Full moves until mate; negative means the side to move gets mated.
    Mate(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Score {
    pub value: ScoreValue,
    pub lower_bound: bool,
    pub upper_bound: bool,
}

impl Score {
    pub fn centipawns(cp: i32) -> Self {
        Score {
            value: ScoreValue::Centipawns(cp),
            lower_bound: false,
            upper_bound: false,
        }
    }

    pub fn mate(moves: i32) -> Self {
        Score {
            value: ScoreValue::Mate(moves),
            lower_bound: false,
            upper_bound: false,
        }
    }

    pub fn is_mate(&self) -> bool {
        matches!(self.value, ScoreValue::Mate(_))
    }
}

impl fmt::Display for Score {
    /// Renders `+0.35`, `-1.20`, `0.00`, `M5` or `-M3`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            ScoreValue::Centipawns(cp) => {
                let pawns = cp as f64 / 100.0;
                if cp > 0 {
                    write!(f, "+{pawns:.2}")
                } else {
                    write!(f, "{pawns:.2}")
                }
            }
            ScoreValue::Mate(moves) => {
                if moves >= 0 {
                    write!(f, "M{moves}")
                } else {
                    write!(f, "-M{}", -moves)
                }
            }
        }
    }
}

/// One analysis update from an engine. Numeric fields default to zero when
/// the engine did not report them.
#[derive(Debug, Clone)]
pub struct AnalysisInfo {
    /// Filled in by the session that produced the record.
    pub engine_id: String,
    pub depth: u32,
    pub seldepth: u32,
    pub score: Option<Score>,
    pub nodes: u64,
    pub nps: u64,
    pub time: Duration,
    /// Principal variation as opaque move tokens.
    pub pv: Vec<String>,
    /// 1-based line index; 0 when the engine is not in multi-pv mode.
    pub multipv: u32,
    pub currmove: Option<String>,
    pub currmovenumber: u32,
    /// Hash table fill, per mille.
    pub hashfull: u32,
    pub tbhits: u64,
    pub captured_at: Instant,
}

impl Default for AnalysisInfo {
    fn default() -> Self {
        AnalysisInfo {
            engine_id: String::new(),
            depth: 0,
            seldepth: 0,
            score: None,
            nodes: 0,
            nps: 0,
            time: Duration::ZERO,
            pv: Vec::new(),
            multipv: 0,
            currmove: None,
            currmovenumber: 0,
            hashfull: 0,
            tbhits: 0,
            captured_at: Instant::now(),
        }
    }
}

impl AnalysisInfo {
    /// Renders the canonical `info …` wire form. Reported fields only, in a
    /// fixed order, so that parse → render → parse is a fixed point.
    pub fn to_info_line(&self) -> String {
        let mut line = String::from("info");
        if self.depth > 0 {
            line.push_str(&format!(" depth {}", self.depth));
        }
        if self.seldepth > 0 {
            line.push_str(&format!(" seldepth {}", self.seldepth));
        }
        if self.multipv > 0 {
            line.push_str(&format!(" multipv {}", self.multipv));
        }
        if let Some(score) = self.score {
            match score.value {
                ScoreValue::Centipawns(cp) => line.push_str(&format!(" score cp {cp}")),
                ScoreValue::Mate(moves) => line.push_str(&format!(" score mate {moves}")),
            }
            if score.lower_bound {
                line.push_str(" lowerbound");
            }
            if score.upper_bound {
                line.push_str(" upperbound");
            }
        }
        if self.nodes > 0 {
            line.push_str(&format!(" nodes {}", self.nodes));
        }
        if self.nps > 0 {
            line.push_str(&format!(" nps {}", self.nps));
        }
        if !self.time.is_zero() {
            line.push_str(&format!(" time {}", self.time.as_millis()));
        }
        if self.hashfull > 0 {
            line.push_str(&format!(" hashfull {}", self.hashfull));
        }
        if self.tbhits > 0 {
            line.push_str(&format!(" tbhits {}", self.tbhits));
        }
        if let Some(ref currmove) = self.currmove {
            line.push_str(&format!(" currmove {currmove}"));
        }
        if self.currmovenumber > 0 {
            line.push_str(&format!(" currmovenumber {}", self.currmovenumber));
        }
        if !self.pv.is_empty() {
            line.push_str(" pv ");
            line.push_str(&self.pv.join(" "));
        }
        line
    }
}

/// The engine's chosen move. `mv` may be the literal `"(none)"` when the
/// engine has no legal reply; it is passed through uninterpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestMove {
    pub mv: String,
    pub ponder: Option<String>,
}

/// Name and author reported during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineIdentity {
    pub name: String,
    pub author: String,
}

/// Search limits for the `go` command. Unset fields are omitted from the
/// wire; `infinite` suppresses every other clause.
#[derive(Debug, Clone, Default)]
pub struct GoParams {
    pub infinite: bool,
    pub ponder: bool,
    pub depth: Option<u32>,
    pub nodes: Option<u64>,
    pub movetime: Option<Duration>,
    pub wtime: Option<Duration>,
    pub btime: Option<Duration>,
    pub winc: Option<Duration>,
    pub binc: Option<Duration>,
    pub movestogo: Option<u32>,
    pub searchmoves: Vec<String>,
}

/// Summary record handed to callers by [`EngineManager::list`] and
/// [`EngineManager::get`](crate::EngineManager::get).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSummary {
    pub id: String,
    pub name: String,
    pub author: String,
    pub binary_path: String,
    pub state: String,
}

/// Element of an engine's analysis stream.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Analysis(AnalysisInfo),
    /// Terminal marker for one search; the state machine is already back in
    /// `Ready` when this is observed.
    BestMove { engine_id: String, best: BestMove },
}

/// Snapshot of an engine's option table.
pub type OptionTable = HashMap<String, UciOption>;
