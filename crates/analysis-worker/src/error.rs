//! Worker error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Stockfish error: {0}")]
    Stockfish(String),

    #[error("Engine install error: {0}")]
    Install(String),

    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("Invalid position: {0}")]
    Position(String),

    #[error(transparent)]
    Pgn(#[from] chess_core::pgn::PgnError),

    #[error("Download failed: {0}")]
    Download(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
