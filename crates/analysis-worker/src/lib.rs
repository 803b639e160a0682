pub use shakmaty;

pub mod analysis;
pub mod annotate;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod install;
pub mod params;
pub mod play;
pub mod session;
pub mod stockfish;
pub mod stream;
pub mod uci;
