pub mod annotate;
pub mod health;
pub mod pgn;
pub mod session_ws;
