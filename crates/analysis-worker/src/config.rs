//! Engine configuration from environment variables

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

/// Where to find (or fetch) the engine and how to run it.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Explicit engine binary (`STOCKFISH_PATH`)
    pub stockfish_path: Option<PathBuf>,

    /// Archive to download when no binary is found (`STOCKFISH_URL`)
    pub stockfish_url: Option<String>,

    /// Directory holding downloaded engines (`STOCKFISH_DIR`)
    pub stockfish_dir: PathBuf,

    /// Transposition table size per engine process in MB
    pub hash_mb: u32,

    /// Default think time per position
    pub think_time: Duration,

    /// Default number of engine processes for annotation
    pub annotation_workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stockfish_path: None,
            stockfish_url: None,
            stockfish_dir: PathBuf::from("stockfish"),
            hash_mb: 64,
            think_time: Duration::from_secs(1),
            annotation_workers: num_cpus::get().max(1),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let stockfish_path = env::var("STOCKFISH_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let stockfish_url = env::var("STOCKFISH_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let stockfish_dir = env::var("STOCKFISH_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.stockfish_dir);

        let hash_mb = env::var("ENGINE_HASH_MB")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.hash_mb);

        let think_time = env::var("ANALYSIS_THINK_TIME")
            .ok()
            .and_then(|v| parse_think_time(&v))
            .unwrap_or(defaults.think_time);

        let annotation_workers = env::var("ANNOTATION_WORKERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.annotation_workers);

        let config = Self {
            stockfish_path,
            stockfish_url,
            stockfish_dir,
            hash_mb,
            think_time,
            annotation_workers,
        };

        info!(
            stockfish_dir = %config.stockfish_dir.display(),
            explicit_path = config.stockfish_path.is_some(),
            hash_mb = config.hash_mb,
            workers = config.annotation_workers,
            "Engine config loaded"
        );

        config
    }
}

/// Positive seconds that fit in a `Duration`.
fn parse_think_time(raw: &str) -> Option<Duration> {
    let secs = raw.trim().parse::<f64>().ok()?;
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| !d.is_zero())
}
