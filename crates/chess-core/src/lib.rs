//! Chess game data shared by the analysis worker and the server.

pub mod game_data;
pub mod notation;
pub mod pgn;

pub use shakmaty;
