//! PGN parsing and export on top of `pgn-reader` and `shakmaty`.

use std::ops::ControlFlow;

use pgn_reader::{RawTag, Reader, SanPlus, Skip, Visitor};
use shakmaty::fen::Fen;
use shakmaty::{CastlingMode, Chess, Color, KnownOutcome, Move, Outcome, Position};
use thiserror::Error;

use crate::notation::{fen_of, play_san};

#[derive(Error, Debug)]
pub enum PgnError {
    #[error("No game found in PGN input.")]
    NoGame,

    #[error("Invalid FEN tag '{fen}': {reason}")]
    InvalidFen { fen: String, reason: String },

    #[error("Illegal move '{san}' at ply {ply}")]
    IllegalMove { san: String, ply: usize },

    #[error("Failed to read PGN: {0}")]
    Io(#[from] std::io::Error),
}

/// A game read from PGN: headers, start position and the mainline.
#[derive(Debug, Clone)]
pub struct ParsedGame {
    pub headers: Vec<(String, String)>,
    pub start: Chess,
    pub moves: Vec<Move>,
    /// SAN of every mainline move, regenerated from the position (with `+`/`#`).
    pub sans: Vec<String>,
}

impl ParsedGame {
    /// First value of a header tag, if present.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn start_fen(&self) -> String {
        fen_of(&self.start)
    }

    /// Board after `ply` half-moves, clamped to the game length.
    pub fn board_at_ply(&self, ply: usize) -> Chess {
        let mut pos = self.start.clone();
        for mv in self.moves.iter().take(ply) {
            pos.play_unchecked(mv.clone());
        }
        pos
    }

    /// Every position of the mainline, start position included.
    pub fn positions(&self) -> Vec<Chess> {
        let mut pos = self.start.clone();
        let mut positions = Vec::with_capacity(self.moves.len() + 1);
        positions.push(pos.clone());
        for mv in &self.moves {
            pos.play_unchecked(mv.clone());
            positions.push(pos.clone());
        }
        positions
    }
}

/// Parse the first game of a PGN text.
pub fn parse_pgn(pgn: &str) -> Result<ParsedGame, PgnError> {
    if pgn.trim().is_empty() {
        return Err(PgnError::NoGame);
    }

    let mut reader = Reader::new(pgn.as_bytes());
    match reader.read_game(&mut GameBuilder)? {
        Some(result) => result,
        None => Err(PgnError::NoGame),
    }
}

/// Parse a FEN string into a standard chess position.
pub fn parse_fen(fen: &str) -> Result<Chess, PgnError> {
    let parsed: Fen = fen.trim().parse().map_err(|e| PgnError::InvalidFen {
        fen: fen.to_string(),
        reason: format!("{e}"),
    })?;
    parsed
        .into_position::<Chess>(CastlingMode::Standard)
        .map_err(|e| PgnError::InvalidFen {
            fen: fen.to_string(),
            reason: format!("{e}"),
        })
}

/// Export moves from `start` as headerless PGN movetext followed by the result.
pub fn export_pgn(start: &Chess, moves: &[Move]) -> String {
    let mut pos = start.clone();
    let mut parts: Vec<String> = Vec::with_capacity(moves.len() + 1);

    for (idx, mv) in moves.iter().enumerate() {
        let white_to_move = pos.turn() == Color::White;
        let number = pos.fullmoves().get();
        let san = play_san(&mut pos, mv);
        if white_to_move {
            parts.push(format!("{number}. {san}"));
        } else if idx == 0 {
            parts.push(format!("{number}... {san}"));
        } else {
            parts.push(san);
        }
    }

    parts.push(result_token(&pos).to_string());
    parts.join(" ")
}

fn result_token(pos: &Chess) -> &'static str {
    match pos.outcome() {
        Outcome::Known(KnownOutcome::Decisive { winner: Color::White }) => "1-0",
        Outcome::Known(KnownOutcome::Decisive { winner: Color::Black }) => "0-1",
        Outcome::Known(KnownOutcome::Draw) => "1/2-1/2",
        Outcome::Unknown => "*",
    }
}

/// Visitor that keeps the headers and replays the mainline, skipping variations.
struct GameBuilder;

struct Movetext {
    headers: Vec<(String, String)>,
    start: Chess,
    position: Chess,
    moves: Vec<Move>,
    sans: Vec<String>,
}

impl Visitor for GameBuilder {
    type Tags = Vec<(String, String)>;
    type Movetext = Movetext;
    type Output = Result<ParsedGame, PgnError>;

    fn begin_tags(&mut self) -> ControlFlow<Self::Output, Self::Tags> {
        ControlFlow::Continue(Vec::new())
    }

    fn tag(
        &mut self,
        tags: &mut Self::Tags,
        name: &[u8],
        value: RawTag<'_>,
    ) -> ControlFlow<Self::Output> {
        tags.push((
            String::from_utf8_lossy(name).into_owned(),
            value.decode_utf8_lossy().into_owned(),
        ));
        ControlFlow::Continue(())
    }

    fn begin_movetext(&mut self, tags: Self::Tags) -> ControlFlow<Self::Output, Self::Movetext> {
        let fen_tag = tags
            .iter()
            .find(|(key, _)| key == "FEN")
            .map(|(_, value)| value.clone());

        let start = match fen_tag {
            Some(fen) => match parse_fen(&fen) {
                Ok(pos) => pos,
                Err(e) => return ControlFlow::Break(Err(e)),
            },
            None => Chess::default(),
        };

        ControlFlow::Continue(Movetext {
            headers: tags,
            position: start.clone(),
            start,
            moves: Vec::new(),
            sans: Vec::new(),
        })
    }

    fn san(&mut self, movetext: &mut Self::Movetext, san_plus: SanPlus) -> ControlFlow<Self::Output> {
        match san_plus.san.to_move(&movetext.position) {
            Ok(mv) => {
                let san = play_san(&mut movetext.position, &mv);
                movetext.sans.push(san);
                movetext.moves.push(mv);
                ControlFlow::Continue(())
            }
            Err(_) => ControlFlow::Break(Err(PgnError::IllegalMove {
                san: san_plus.to_string(),
                ply: movetext.moves.len() + 1,
            })),
        }
    }

    fn begin_variation(&mut self, _movetext: &mut Self::Movetext) -> ControlFlow<Self::Output, Skip> {
        ControlFlow::Continue(Skip(true))
    }

    fn end_game(&mut self, movetext: Self::Movetext) -> Self::Output {
        Ok(ParsedGame {
            headers: movetext.headers,
            start: movetext.start,
            moves: movetext.moves,
            sans: movetext.sans,
        })
    }
}
