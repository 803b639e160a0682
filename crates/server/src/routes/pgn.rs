use std::collections::BTreeMap;

use axum::Json;
use chess_core::game_data::{extract_game_info, move_rows, GameInfo, MoveRow};
use chess_core::notation::{fen_of, uci_of};
use chess_core::pgn::parse_pgn;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Deserialize)]
pub struct ParsePgnRequest {
    pub pgn: String,
}

#[derive(Debug, Serialize)]
pub struct ParsedPgnResponse {
    pub headers: BTreeMap<String, String>,
    pub start_fen: String,
    pub final_fen: String,
    pub sans: Vec<String>,
    pub moves: Vec<String>,
    pub move_rows: Vec<MoveRow>,
    pub info: GameInfo,
}

/// POST /api/pgn/parse
pub async fn parse(Json(body): Json<ParsePgnRequest>) -> Result<Json<ParsedPgnResponse>, AppError> {
    if body.pgn.trim().is_empty() {
        return Err(AppError::BadRequest("PGN is empty".into()));
    }
    let game = parse_pgn(&body.pgn)?;

    // Repeated tags keep their first value
    let mut headers = BTreeMap::new();
    for (key, value) in &game.headers {
        headers.entry(key.clone()).or_insert_with(|| value.clone());
    }

    Ok(Json(ParsedPgnResponse {
        headers,
        start_fen: game.start_fen(),
        final_fen: fen_of(&game.board_at_ply(game.moves.len())),
        moves: game.moves.iter().map(uci_of).collect(),
        move_rows: move_rows(&game.start, &game.sans),
        info: extract_game_info(Some(&game)),
        sans: game.sans,
    }))
}
