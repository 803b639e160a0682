//! Play against the engine: player board state and engine replies.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chess_core::notation::{
    fen_of, format_pv, format_score, parse_uci, play_san, uci_of, Score, MAX_PV_PLIES, PV_SEPARATOR,
};
use chess_core::pgn::export_pgn;
use serde::{Deserialize, Serialize};
use shakmaty::{Chess, Color, Move, Position};
use tracing::debug;

use crate::error::EngineError;
use crate::stockfish::{EngineOptions, SearchLimit, StockfishEngine};

/// Think time for engine replies in play mode.
pub const DEFAULT_ENGINE_TIME: Duration = Duration::from_millis(150);

/// Which side the engine plays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineSide {
    White,
    #[default]
    Black,
    None,
}

impl EngineSide {
    /// Whether the engine should move in `pos`.
    pub fn to_move(self, pos: &Chess) -> bool {
        match self {
            EngineSide::White => pos.turn() == Color::White,
            EngineSide::Black => pos.turn() == Color::Black,
            EngineSide::None => false,
        }
    }
}

impl FromStr for EngineSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "white" => Ok(EngineSide::White),
            "" | "black" => Ok(EngineSide::Black),
            "none" => Ok(EngineSide::None),
            other => Err(format!("unknown engine side '{other}'")),
        }
    }
}

impl fmt::Display for EngineSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EngineSide::White => "white",
            EngineSide::Black => "black",
            EngineSide::None => "none",
        })
    }
}

/// Result of a user move attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UserMoveOutcome {
    Played { san: String, uci: String, fen: String },
    /// Illegal move; the board shown should revert to `fen`
    Rejected { fen: String },
}

/// The game being played in play mode.
#[derive(Debug, Clone, Default)]
pub struct PlayBoard {
    start: Chess,
    position: Chess,
    moves: Vec<Move>,
    sans: Vec<String>,
}

impl PlayBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an arbitrary position instead of the initial one.
    pub fn from_position(start: Chess) -> Self {
        Self {
            position: start.clone(),
            start,
            moves: Vec::new(),
            sans: Vec::new(),
        }
    }

    pub fn start(&self) -> &Chess {
        &self.start
    }

    pub fn position(&self) -> &Chess {
        &self.position
    }

    pub fn fen(&self) -> String {
        fen_of(&self.position)
    }

    pub fn moves(&self) -> &[Move] {
        &self.moves
    }

    pub fn sans(&self) -> &[String] {
        &self.sans
    }

    pub fn is_game_over(&self) -> bool {
        self.position.is_game_over()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn push(&mut self, mv: Move) -> String {
        let san = play_san(&mut self.position, &mv);
        self.moves.push(mv);
        self.sans.push(san.clone());
        san
    }

    /// Play a move given by its squares (`"e2"`, `"e4"`). Pawn moves to the
    /// last rank promote to a queen.
    pub fn apply_user_move(&mut self, from: &str, to: &str) -> UserMoveOutcome {
        let base = format!("{}{}", from.trim(), to.trim()).to_ascii_lowercase();
        let mv = parse_uci(&self.position, &base).or_else(|| parse_uci(&self.position, &format!("{base}q")));

        match mv {
            Some(mv) => {
                let uci = uci_of(&mv);
                let san = self.push(mv);
                UserMoveOutcome::Played {
                    san,
                    uci,
                    fen: self.fen(),
                }
            }
            None => {
                debug!(mv = %base, "Rejected illegal user move");
                UserMoveOutcome::Rejected { fen: self.fen() }
            }
        }
    }

    /// Apply an engine reply computed for `expected_fen`. Replies for a
    /// position that is no longer on the board are discarded.
    pub fn apply_engine_move(&mut self, expected_fen: &str, uci: &str) -> Option<String> {
        if self.fen() != expected_fen {
            debug!(expected_fen, "Discarding stale engine move");
            return None;
        }
        let mv = parse_uci(&self.position, uci)?;
        Some(self.push(mv))
    }

    /// Headerless PGN of the moves played so far.
    pub fn to_pgn(&self) -> String {
        export_pgn(&self.start, &self.moves)
    }
}

/// Engine choice for a position, score from White's point of view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineMove {
    pub best_move: Option<String>,
    pub score: Option<Score>,
    pub pv: Vec<String>,
}

/// Ask a fresh engine at `skill_level` (0-20) for its move.
pub async fn engine_best_move(
    path: &Path,
    hash_mb: u32,
    pos: &Chess,
    skill_level: u8,
    think_time: Duration,
) -> Result<EngineMove, EngineError> {
    let options = EngineOptions {
        hash_mb,
        skill_level: Some(skill_level.min(20)),
        ..EngineOptions::default()
    };
    let mut engine = StockfishEngine::with_options(path, &options).await?;
    let result = engine.analyse(&fen_of(pos), &SearchLimit::time(think_time)).await;
    engine.quit().await;

    let info = result?;
    let white_to_move = pos.turn() == Color::White;
    Ok(EngineMove {
        best_move: info.best_move().map(str::to_string),
        score: info.score.map(|s| s.white_pov(white_to_move)),
        pv: info.pv,
    })
}

/// Full-strength best move with the analysis parameters.
pub async fn best_move_uci(
    path: &Path,
    hash_mb: u32,
    pos: &Chess,
    think_time: Duration,
    threads: u32,
    multipv: u32,
) -> Result<Option<String>, EngineError> {
    let options = EngineOptions {
        threads,
        hash_mb,
        ..EngineOptions::default()
    };
    let mut engine = StockfishEngine::with_options(path, &options).await?;
    let result = engine
        .analyse_multipv(&fen_of(pos), &SearchLimit::time(think_time), multipv)
        .await;
    engine.quit().await;

    Ok(result?
        .first()
        .and_then(|line| line.best_move())
        .map(str::to_string))
}

/// `Eval: +0.25 — 1. e4 e5`, or `Eval: --` without a score.
pub fn format_engine_eval(pos: &Chess, score: Option<Score>, pv: &[String]) -> String {
    if score.is_none() {
        return "Eval: --".to_string();
    }
    let score_text = format_score(score);
    let pv_text = format_pv(pos, pv, MAX_PV_PLIES);
    if pv_text.is_empty() {
        format!("Eval: {score_text}")
    } else {
        format!("Eval: {score_text}{PV_SEPARATOR}{pv_text}")
    }
}
