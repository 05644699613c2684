//! Outbound command serialization. Each builder returns the exact wire
//! string without a trailing newline; the session appends it on write.

use crate::types::GoParams;

/// Builds a `setoption` command. An empty value produces the bare form used
/// by button options (`setoption name Clear Hash`).
pub fn set_option_command(name: &str, value: &str) -> String {
    if value.is_empty() {
        format!("setoption name {name}")
    } else {
        format!("setoption name {name} value {value}")
    }
}

/// Builds a `position` command. An empty descriptor or the literal
/// `"startpos"` selects the starting position; anything else is passed as a
/// FEN string.
pub fn position_command(descriptor: &str, moves: &[String]) -> String {
    let mut cmd = String::from("position");
    if descriptor.is_empty() || descriptor == "startpos" {
        cmd.push_str(" startpos");
    } else {
        cmd.push_str(" fen ");
        cmd.push_str(descriptor);
    }
    if !moves.is_empty() {
        cmd.push_str(" moves ");
        cmd.push_str(&moves.join(" "));
    }
    cmd
}

/// Builds a `go` command. Clauses appear in a fixed order and only when set;
/// `infinite` stands alone.
pub fn go_command(params: &GoParams) -> String {
    let mut cmd = String::from("go");

    if params.infinite {
        cmd.push_str(" infinite");
        return cmd;
    }

    if params.ponder {
        cmd.push_str(" ponder");
    }
    if let Some(depth) = params.depth {
        cmd.push_str(&format!(" depth {depth}"));
    }
    if let Some(nodes) = params.nodes {
        cmd.push_str(&format!(" nodes {nodes}"));
    }
    if let Some(movetime) = params.movetime {
        cmd.push_str(&format!(" movetime {}", movetime.as_millis()));
    }
    if let Some(wtime) = params.wtime {
        cmd.push_str(&format!(" wtime {}", wtime.as_millis()));
    }
    if let Some(btime) = params.btime {
        cmd.push_str(&format!(" btime {}", btime.as_millis()));
    }
    if let Some(winc) = params.winc {
        cmd.push_str(&format!(" winc {}", winc.as_millis()));
    }
    if let Some(binc) = params.binc {
        cmd.push_str(&format!(" binc {}", binc.as_millis()));
    }
    if let Some(movestogo) = params.movestogo {
        cmd.push_str(&format!(" movestogo {movestogo}"));
    }
    if !params.searchmoves.is_empty() {
        cmd.push_str(" searchmoves ");
        cmd.push_str(&params.searchmoves.join(" "));
    }
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn moves(list: &[&str]) -> Vec<String> {
        list.iter().map(|m| m.to_string()).collect()
    }

    #[test]
    fn go_infinite_suppresses_everything_else() {
        let params = GoParams {
            infinite: true,
            depth: Some(20),
            movetime: Some(Duration::from_secs(1)),
            ..GoParams::default()
        };
        assert_eq!(go_command(&params), "go infinite");
    }

    #[test]
    fn go_depth() {
        let params = GoParams {
            depth: Some(20),
            ..GoParams::default()
        };
        assert_eq!(go_command(&params), "go depth 20");
    }

    #[test]
    fn go_movetime() {
        let params = GoParams {
            movetime: Some(Duration::from_secs(5)),
            ..GoParams::default()
        };
        assert_eq!(go_command(&params), "go movetime 5000");
    }

    #[test]
    fn go_time_control() {
        let params = GoParams {
            wtime: Some(Duration::from_secs(300)),
            btime: Some(Duration::from_secs(300)),
            winc: Some(Duration::from_secs(3)),
            binc: Some(Duration::from_secs(3)),
            ..GoParams::default()
        };
        assert_eq!(
            go_command(&params),
            "go wtime 300000 btime 300000 winc 3000 binc 3000"
        );
    }

    #[test]
    fn go_nodes() {
        let params = GoParams {
            nodes: Some(1_000_000),
            ..GoParams::default()
        };
        assert_eq!(go_command(&params), "go nodes 1000000");
    }

    #[test]
    fn go_searchmoves() {
        let params = GoParams {
            depth: Some(10),
            searchmoves: moves(&["e2e4", "d2d4"]),
            ..GoParams::default()
        };
        assert_eq!(go_command(&params), "go depth 10 searchmoves e2e4 d2d4");
    }

    #[test]
    fn go_ponder_precedes_limits() {
        let params = GoParams {
            ponder: true,
            movestogo: Some(40),
            ..GoParams::default()
        };
        assert_eq!(go_command(&params), "go ponder movestogo 40");
    }

    #[test]
    fn go_set_clauses_survive_a_lexing_round_trip() {
        let params = GoParams {
            depth: Some(12),
            nodes: Some(500),
            movestogo: Some(10),
            ..GoParams::default()
        };
        let cmd = go_command(&params);
        let tokens: Vec<&str> = cmd.split_whitespace().collect();
        assert_eq!(tokens, ["go", "depth", "12", "nodes", "500", "movestogo", "10"]);
    }

    #[test]
    fn position_startpos() {
        assert_eq!(position_command("startpos", &[]), "position startpos");
    }

    #[test]
    fn position_empty_descriptor_means_startpos() {
        assert_eq!(
            position_command("", &moves(&["e2e4", "e7e5"])),
            "position startpos moves e2e4 e7e5"
        );
        assert_eq!(
            position_command("", &moves(&["e2e4", "e7e5"])),
            position_command("startpos", &moves(&["e2e4", "e7e5"]))
        );
    }

    #[test]
    fn position_fen() {
        let fen = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1";
        assert_eq!(
            position_command(fen, &[]),
            format!("position fen {fen}")
        );
        assert_eq!(
            position_command(fen, &moves(&["e7e5"])),
            format!("position fen {fen} moves e7e5")
        );
    }

    #[test]
    fn set_option_forms() {
        assert_eq!(
            set_option_command("Hash", "256"),
            "setoption name Hash value 256"
        );
        assert_eq!(
            set_option_command("Clear Hash", ""),
            "setoption name Clear Hash"
        );
        assert_eq!(
            set_option_command("SyzygyPath", "/path/to/syzygy"),
            "setoption name SyzygyPath value /path/to/syzygy"
        );
    }
}
