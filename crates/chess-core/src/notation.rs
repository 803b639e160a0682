//! Move, score and PV notation helpers.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use shakmaty::fen::Fen;
use shakmaty::san::San;
use shakmaty::uci::UciMove;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, Move, Position};

/// Separator between the score and the moves of a rendered PV line.
pub const PV_SEPARATOR: &str = " — ";

/// Default number of plies rendered for a PV line.
pub const MAX_PV_PLIES: usize = 16;

static MOVE_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.(\.\.)?$").expect("valid move number regex"));

/// Engine score. The point of view depends on context (side to move for raw
/// engine output, White once normalised).
///
/// `Mate(0)` means the point-of-view side is checkmated. Its negation is
/// `MateGiven`, so a delivered mate keeps its sign after a flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Score {
    Cp(i32),
    Mate(i32),
    MateGiven,
}

impl Score {
    /// Flip the point of view.
    pub fn negate(self) -> Self {
        match self {
            Score::Cp(cp) => Score::Cp(-cp),
            Score::Mate(0) => Score::MateGiven,
            Score::MateGiven => Score::Mate(0),
            Score::Mate(m) => Score::Mate(-m),
        }
    }

    /// Convert a side-to-move score into White's point of view.
    pub fn white_pov(self, white_to_move: bool) -> Self {
        if white_to_move {
            self
        } else {
            self.negate()
        }
    }

    /// Centipawns, with mates mapped to `mate_score` minus the distance.
    pub fn to_cp(self, mate_score: i32) -> i32 {
        match self {
            Score::Cp(cp) => cp,
            Score::MateGiven => mate_score,
            Score::Mate(m) if m > 0 => mate_score - m,
            Score::Mate(m) => -mate_score - m,
        }
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Mate(m) => write!(f, "Mate in {m}"),
            Score::MateGiven => write!(f, "Mate in 0"),
            Score::Cp(cp) => {
                let value = *cp as f64 / 100.0;
                if value >= 0.0 {
                    write!(f, "+{value:.2}")
                } else {
                    write!(f, "{value:.2}")
                }
            }
        }
    }
}

/// Render an optional score, `Eval: ?` when the engine gave none.
pub fn format_score(score: Option<Score>) -> String {
    match score {
        Some(score) => score.to_string(),
        None => "Eval: ?".to_string(),
    }
}

/// FEN of a position (en passant square only when a capture is legal).
pub fn fen_of(pos: &Chess) -> String {
    Fen::from_position(pos, EnPassantMode::Legal).to_string()
}

pub fn uci_of(mv: &Move) -> String {
    mv.to_uci(CastlingMode::Standard).to_string()
}

/// SAN of `mv` in `pos`, without check suffix.
pub fn san_of(pos: &Chess, mv: &Move) -> String {
    San::from_move(pos, mv.clone()).to_string()
}

/// Play `mv` and return its SAN including the `+`/`#` suffix.
pub fn play_san(pos: &mut Chess, mv: &Move) -> String {
    let mut san = san_of(pos, mv);
    pos.play_unchecked(mv.clone());
    if pos.is_checkmate() {
        san.push('#');
    } else if pos.is_check() {
        san.push('+');
    }
    san
}

/// Resolve a UCI move string against a position.
pub fn parse_uci(pos: &Chess, uci: &str) -> Option<Move> {
    let uci_move: UciMove = uci.parse().ok()?;
    uci_move.to_move(pos).ok()
}

/// Render a UCI principal variation as numbered SAN, stopping at the first
/// move that is not legal in the replayed position.
pub fn format_pv(pos: &Chess, pv: &[String], max_plies: usize) -> String {
    let mut temp = pos.clone();
    let mut parts = Vec::new();

    for (idx, uci) in pv.iter().take(max_plies).enumerate() {
        let Some(mv) = parse_uci(&temp, uci) else {
            break;
        };
        let white_to_move = temp.turn() == Color::White;
        let number = temp.fullmoves().get();
        let san = play_san(&mut temp, &mv);
        if white_to_move {
            parts.push(format!("{number}. {san}"));
        } else if idx == 0 {
            parts.push(format!("{number}... {san}"));
        } else {
            parts.push(san);
        }
    }

    parts.join(" ")
}

/// `"{score} — {pv}"` as shown in the PV lists.
pub fn format_pv_line(pos: &Chess, score: Score, pv: &[String]) -> String {
    format!("{score}{PV_SEPARATOR}{}", format_pv(pos, pv, MAX_PV_PLIES))
}

/// Strip check and mate markers from SAN.
pub fn normalize_san(san: &str) -> &str {
    san.trim_end_matches(['+', '#'])
}

/// First move of a rendered PV line, skipping the score and move numbers.
pub fn extract_first_pv_move(pv_line: &str) -> Option<String> {
    let pv_part = match pv_line.split_once('—') {
        Some((_, rest)) => rest.trim(),
        None => pv_line.trim(),
    };

    let mut tokens = pv_part.split_whitespace();
    let first = tokens.next()?;
    if MOVE_NUMBER_RE.is_match(first) || first.ends_with('.') {
        return tokens.next().map(str::to_string);
    }
    Some(first.to_string())
}

/// Score portion of a rendered PV line, if it has one.
pub fn pv_line_score(pv_line: &str) -> Option<&str> {
    pv_line
        .split_once(PV_SEPARATOR)
        .map(|(score, _)| score.trim())
}
