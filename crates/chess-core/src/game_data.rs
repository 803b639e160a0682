use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use shakmaty::{Chess, Color, Move, Position};

use crate::pgn::ParsedGame;

const UNKNOWN: &str = "Unknown";

/// Game metadata shown above the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameInfo {
    pub start: String,
    pub end: String,
    pub duration: String,
    pub white: String,
    pub black: String,
    pub white_elo: String,
    pub black_elo: String,
}

impl Default for GameInfo {
    fn default() -> Self {
        Self {
            start: UNKNOWN.to_string(),
            end: UNKNOWN.to_string(),
            duration: UNKNOWN.to_string(),
            white: UNKNOWN.to_string(),
            black: UNKNOWN.to_string(),
            white_elo: UNKNOWN.to_string(),
            black_elo: UNKNOWN.to_string(),
        }
    }
}

/// One row of the move table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRow {
    pub number: usize,
    pub white: String,
    pub black: String,
}

/// Group SAN moves into numbered white/black rows, numbered from `start`.
/// When Black moves first the opening row has an empty white cell.
pub fn move_rows(start: &Chess, sans: &[String]) -> Vec<MoveRow> {
    let mut number = start.fullmoves().get() as usize;
    let mut rows = Vec::with_capacity(sans.len() / 2 + 1);
    let mut rest = sans;

    if start.turn() == Color::Black {
        if let Some((first, tail)) = rest.split_first() {
            rows.push(MoveRow {
                number,
                white: String::new(),
                black: first.clone(),
            });
            number += 1;
            rest = tail;
        }
    }

    for pair in rest.chunks(2) {
        rows.push(MoveRow {
            number,
            white: pair[0].clone(),
            black: pair.get(1).cloned().unwrap_or_default(),
        });
        number += 1;
    }
    rows
}

/// Board at `ply` (0 = start position); without a game this is the initial position.
pub fn board_at_ply(game: Option<&ParsedGame>, ply: usize) -> Chess {
    match game {
        Some(game) => game.board_at_ply(ply),
        None => Chess::default(),
    }
}

/// Board after the first `ply` moves from the initial position (all moves when `None`).
pub fn board_from_moves(moves: &[Move], ply: Option<usize>) -> Chess {
    let limit = ply.map_or(moves.len(), |p| p.min(moves.len()));
    let mut board = Chess::default();
    for mv in &moves[..limit] {
        board.play_unchecked(mv.clone());
    }
    board
}

/// Parse a PGN date tag (`YYYY.MM.DD`); unknown parts (`?`) yield `None`.
pub fn parse_date(value: Option<&str>) -> Option<NaiveDate> {
    let value = value?;
    if value.is_empty() || value.contains('?') {
        return None;
    }
    NaiveDate::parse_from_str(value, "%Y.%m.%d").ok()
}

/// Parse a PGN time tag (`HH:MM:SS` or `HH:MM`).
pub fn parse_time(value: Option<&str>) -> Option<NaiveTime> {
    let value = value?;
    if value.is_empty() || value.contains('?') {
        return None;
    }
    ["%H:%M:%S", "%H:%M"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(value, fmt).ok())
}

pub fn parse_datetime(date: Option<&str>, time: Option<&str>) -> Option<NaiveDateTime> {
    Some(parse_date(date)?.and_time(parse_time(time)?))
}

pub fn format_datetime(value: Option<NaiveDateTime>) -> String {
    match value {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => UNKNOWN.to_string(),
    }
}

/// `HH:MM:SS` between two timestamps; an end before the start wraps one day.
pub fn format_duration(start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> String {
    let (Some(start), Some(end)) = (start, end) else {
        return UNKNOWN.to_string();
    };
    let mut delta = end - start;
    if delta < Duration::zero() {
        delta += Duration::days(1);
    }
    let seconds = delta.num_seconds();
    let (hours, remainder) = (seconds / 3600, seconds % 3600);
    let (minutes, seconds) = (remainder / 60, remainder % 60);
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// Extract game metadata from PGN headers.
pub fn extract_game_info(game: Option<&ParsedGame>) -> GameInfo {
    let Some(game) = game else {
        return GameInfo::default();
    };

    let header = |name: &str| game.header(name);
    let start = parse_datetime(
        header("UTCDate").or(header("Date")),
        header("UTCTime").or(header("Time")),
    );
    let end = parse_datetime(
        header("EndDate").or(header("UTCDate")).or(header("Date")),
        header("EndTime"),
    );
    let text = |name: &str| header(name).unwrap_or(UNKNOWN).to_string();

    GameInfo {
        start: format_datetime(start),
        end: format_datetime(end),
        duration: format_duration(start, end),
        white: text("White"),
        black: text("Black"),
        white_elo: text("WhiteElo"),
        black_elo: text("BlackElo"),
    }
}
