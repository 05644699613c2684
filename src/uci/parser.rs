//! Inbound line parsing.
//!
//! The parser is deliberately permissive: real engines ship vendor keywords
//! and free-form `info string` payloads, so unknown tokens are skipped and
//! malformed numbers fall back to zero instead of failing the line.

use std::time::Duration;

use crate::types::{AnalysisInfo, BestMove, OptionKind, Score, ScoreValue, UciOption};

/// One parsed engine output line.
#[derive(Debug, Clone)]
pub enum UciMessage {
    Empty,
    Unknown(String),
    IdName(String),
    IdAuthor(String),
    UciOk,
    ReadyOk,
    Option(UciOption),
    Info(AnalysisInfo),
    BestMove(BestMove),
}

/// Parses a single engine output line. Never fails; lines that carry no
/// recognizable message come back as `Empty` or `Unknown`.
pub fn parse_line(line: &str) -> UciMessage {
    let line = line.trim();
    if line.is_empty() {
        return UciMessage::Empty;
    }

    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens[0] {
        "id" => parse_id(line, &tokens[1..]),
        "uciok" => UciMessage::UciOk,
        "readyok" => UciMessage::ReadyOk,
        "bestmove" => parse_bestmove(&tokens[1..]),
        "info" => UciMessage::Info(parse_info(&tokens[1..])),
        "option" => UciMessage::Option(parse_option(&tokens[1..])),
        _ => UciMessage::Unknown(line.to_string()),
    }
}

fn parse_id(line: &str, tokens: &[&str]) -> UciMessage {
    if tokens.len() < 2 {
        return UciMessage::Unknown(line.to_string());
    }
    match tokens[0] {
        "name" => UciMessage::IdName(tokens[1..].join(" ")),
        "author" => UciMessage::IdAuthor(tokens[1..].join(" ")),
        _ => UciMessage::Unknown(line.to_string()),
    }
}

fn parse_bestmove(tokens: &[&str]) -> UciMessage {
    let Some(mv) = tokens.first() else {
        return UciMessage::Empty;
    };
    let mut ponder = None;
    for i in 1..tokens.len() {
        if tokens[i] == "ponder" {
            ponder = tokens.get(i + 1).map(|p| p.to_string());
            break;
        }
    }
    UciMessage::BestMove(BestMove {
        mv: mv.to_string(),
        ponder,
    })
}

fn parse_info(tokens: &[&str]) -> AnalysisInfo {
    let mut info = AnalysisInfo::default();
    let mut score_value = None;
    let mut lower_bound = false;
    let mut upper_bound = false;

    let mut i = 0;
    while i < tokens.len() {
        match tokens[i] {
            "depth" => {
                if let Some(v) = tokens.get(i + 1) {
                    info.depth = v.parse().unwrap_or(0);
                    i += 1;
                }
            }
            "seldepth" => {
                if let Some(v) = tokens.get(i + 1) {
                    info.seldepth = v.parse().unwrap_or(0);
                    i += 1;
                }
            }
            "multipv" => {
                if let Some(v) = tokens.get(i + 1) {
                    info.multipv = v.parse().unwrap_or(0);
                    i += 1;
                }
            }
            "score" => {
                i = parse_score(
                    tokens,
                    i + 1,
                    &mut score_value,
                    &mut lower_bound,
                    &mut upper_bound,
                );
            }
            "nodes" => {
                if let Some(v) = tokens.get(i + 1) {
                    info.nodes = v.parse().unwrap_or(0);
                    i += 1;
                }
            }
            "nps" => {
                if let Some(v) = tokens.get(i + 1) {
                    info.nps = v.parse().unwrap_or(0);
                    i += 1;
                }
            }
            "time" => {
                if let Some(v) = tokens.get(i + 1) {
                    info.time = Duration::from_millis(v.parse().unwrap_or(0));
                    i += 1;
                }
            }
            "hashfull" => {
                if let Some(v) = tokens.get(i + 1) {
                    info.hashfull = v.parse().unwrap_or(0);
                    i += 1;
                }
            }
            "tbhits" => {
                if let Some(v) = tokens.get(i + 1) {
                    info.tbhits = v.parse().unwrap_or(0);
                    i += 1;
                }
            }
            "currmove" => {
                if let Some(v) = tokens.get(i + 1) {
                    info.currmove = Some(v.to_string());
                    i += 1;
                }
            }
            "currmovenumber" => {
                if let Some(v) = tokens.get(i + 1) {
                    info.currmovenumber = v.parse().unwrap_or(0);
                    i += 1;
                }
            }
            // The pv runs to the end of the line.
            "pv" => {
                info.pv = tokens[i + 1..].iter().map(|m| m.to_string()).collect();
                break;
            }
            // Free-text payload; nothing after it is a keyword.
            "string" => break,
            _ => {
                // Unknown keyword: skip its value token too, unless that
                // token is itself a keyword.
                if let Some(next) = tokens.get(i + 1) {
                    if !is_info_keyword(next) {
                        i += 1;
                    }
                }
            }
        }
        i += 1;
    }

    if let Some(value) = score_value {
        info.score = Some(Score {
            value,
            lower_bound,
            upper_bound,
        });
    }
    info
}

/// Consumes the `score` section starting at `start` and returns the index of
/// the last token it consumed; the caller resumes after it.
fn parse_score(
    tokens: &[&str],
    start: usize,
    value: &mut Option<ScoreValue>,
    lower_bound: &mut bool,
    upper_bound: &mut bool,
) -> usize {
    let mut i = start;
    while i < tokens.len() {
        match tokens[i] {
            "cp" => {
                if let Some(v) = tokens.get(i + 1) {
                    *value = Some(ScoreValue::Centipawns(v.parse().unwrap_or(0)));
                    i += 1;
                }
            }
            "mate" => {
                if let Some(v) = tokens.get(i + 1) {
                    *value = Some(ScoreValue::Mate(v.parse().unwrap_or(0)));
                    i += 1;
                }
            }
            "lowerbound" => *lower_bound = true,
            "upperbound" => *upper_bound = true,
            _ => return i - 1,
        }
        i += 1;
    }
    i - 1
}

fn is_info_keyword(token: &str) -> bool {
    matches!(
        token,
        "depth"
            | "seldepth"
            | "multipv"
            | "score"
            | "nodes"
            | "nps"
            | "time"
            | "hashfull"
            | "tbhits"
            | "currmove"
            | "currmovenumber"
            | "pv"
            | "string"
    )
}

fn parse_option(tokens: &[&str]) -> UciOption {
    let mut opt = UciOption {
        name: String::new(),
        kind: OptionKind::String,
        default_value: String::new(),
        min: None,
        max: None,
        choices: Vec::new(),
        value: String::new(),
    };
    let mut kind_seen = false;

    let mut i = 0;
    while i < tokens.len() {
        match tokens[i] {
            // Option names may contain spaces; the name runs until `type`.
            "name" => {
                let mut end = i + 1;
                while end < tokens.len() && tokens[end] != "type" {
                    end += 1;
                }
                opt.name = tokens[i + 1..end].join(" ");
                i = end.saturating_sub(1);
            }
            "type" => {
                if let Some(v) = tokens.get(i + 1) {
                    opt.kind = OptionKind::from_token(v);
                    kind_seen = true;
                    i += 1;
                }
            }
            "default" => {
                if kind_seen && opt.kind == OptionKind::String {
                    // String defaults may be multi-word; run to the next
                    // option keyword or end of line.
                    let mut end = i + 1;
                    while end < tokens.len() && !is_option_keyword(tokens[end]) {
                        end += 1;
                    }
                    if end > i + 1 {
                        opt.default_value = tokens[i + 1..end].join(" ");
                    }
                    i = end - 1;
                } else if let Some(v) = tokens.get(i + 1) {
                    opt.default_value = v.to_string();
                    i += 1;
                }
            }
            "min" => {
                if let Some(v) = tokens.get(i + 1) {
                    opt.min = Some(v.parse().unwrap_or(0));
                    i += 1;
                }
            }
            "max" => {
                if let Some(v) = tokens.get(i + 1) {
                    opt.max = Some(v.parse().unwrap_or(0));
                    i += 1;
                }
            }
            "var" => {
                if let Some(v) = tokens.get(i + 1) {
                    opt.choices.push(v.to_string());
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }

    opt.value = opt.default_value.clone();
    opt
}

fn is_option_keyword(token: &str) -> bool {
    matches!(token, "name" | "type" | "default" | "min" | "max" | "var")
}
