//! chess-lab command line
//!
//! Annotates PGN files, streams analysis of a single position and installs
//! the Stockfish binary, using the same workers as the web session.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use analysis_worker::analysis::Metric;
use analysis_worker::annotate::{annotate_game, AnnotateRequest, GameAnnotations};
use analysis_worker::config::EngineConfig;
use analysis_worker::evaluate::StockfishLauncher;
use analysis_worker::install::ensure_stockfish_binary;
use analysis_worker::params::EngineParams;
use analysis_worker::stockfish::{EngineOptions, StockfishEngine};
use analysis_worker::stream::{mover_cpl, stream_analysis, StreamRequest};
use chess_core::game_data::move_rows;
use chess_core::pgn::{parse_fen, parse_pgn};
use shakmaty::{Chess, Position};

#[derive(Parser, Debug)]
#[command(author, version, about = "Chess game annotation and analysis with Stockfish", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Label every move of a PGN game
    Annotate {
        /// PGN file to annotate
        pgn: PathBuf,

        /// Evaluation metric: cpl or wdl
        #[arg(long, default_value = "cpl")]
        metric: Metric,

        /// Seconds per position
        #[arg(long)]
        think_time: Option<f64>,

        /// Engine processes (defaults to ANNOTATION_WORKERS)
        #[arg(long)]
        workers: Option<usize>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Stream the engine's view of one position
    Analyse {
        /// Position to analyse (defaults to the initial position)
        #[arg(long, conflicts_with = "pgn")]
        fen: Option<String>,

        /// PGN file; the position after --ply half-moves is analysed
        #[arg(long)]
        pgn: Option<PathBuf>,

        #[arg(long, default_value_t = 0)]
        ply: usize,

        #[arg(long, default_value = "1.0")]
        think_time: String,

        #[arg(long, default_value = "1")]
        threads: String,

        #[arg(long, default_value = "3")]
        multipv: String,
    },

    /// Locate or download the Stockfish binary and print its path
    Install,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load .env file for local dev
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let config = EngineConfig::from_env();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping engine");
                cancel.cancel();
            }
        });
    }

    match args.command {
        Command::Annotate {
            pgn,
            metric,
            think_time,
            workers,
            json,
        } => {
            let text = std::fs::read_to_string(&pgn)
                .with_context(|| format!("Failed to read {}", pgn.display()))?;
            let game = parse_pgn(&text)?;
            let path = ensure_stockfish_binary(&config).await?;
            let launcher = StockfishLauncher::new(path, config.hash_mb);

            let request = AnnotateRequest {
                start: game.start.clone(),
                moves: game.moves.clone(),
                time_limit: think_time
                    .map(|t| EngineParams { think_time: t, ..EngineParams::default() }.clamped())
                    .map(|p| p.think_duration())
                    .unwrap_or(config.think_time),
                workers: workers.unwrap_or(config.annotation_workers),
                metric,
            };

            let Some(annotations) = annotate_game(&launcher, &request, &cancel).await? else {
                info!("Annotation stopped");
                return Ok(());
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&annotations)?);
            } else {
                print_annotations(&game.start, &game.sans, &annotations, metric);
            }
        }

        Command::Analyse {
            fen,
            pgn,
            ply,
            think_time,
            threads,
            multipv,
        } => {
            let params = EngineParams::from_inputs(&think_time, &threads, &multipv);
            let (position, previous) = match (fen, pgn) {
                (Some(fen), _) => (parse_fen(&fen)?, None),
                (None, Some(pgn)) => {
                    let text = std::fs::read_to_string(&pgn)
                        .with_context(|| format!("Failed to read {}", pgn.display()))?;
                    let game = parse_pgn(&text)?;
                    let ply = ply.min(game.moves.len());
                    let previous = (ply > 0).then(|| game.board_at_ply(ply - 1));
                    (game.board_at_ply(ply), previous)
                }
                (None, None) => (Chess::default(), None),
            };
            let mover_is_white = previous
                .as_ref()
                .map_or(true, |prev: &Chess| prev.turn().is_white());

            let path = ensure_stockfish_binary(&config).await?;
            let options = EngineOptions {
                threads: params.threads,
                hash_mb: config.hash_mb,
                show_wdl: true,
                skill_level: None,
            };
            let mut engine = StockfishEngine::with_options(&path, &options).await?;
            let request = StreamRequest {
                position,
                previous,
                time_limit: params.think_duration(),
                depth: None,
                multipv: params.multipv,
                threads: params.threads,
            };

            let outcome = stream_analysis(&mut engine, &request, &cancel, |update| {
                if !update.done {
                    return;
                }
                for line in &update.lines {
                    println!("{line}");
                }
                if let Some(delta) = update.delta_cp {
                    println!("CPL: {}", mover_cpl(delta, mover_is_white));
                }
                if let Some(wdl) = update.wdl {
                    println!("ES: {wdl:.2}");
                }
                if let Some(best) = &update.best_move {
                    println!("Best move: {best}");
                }
            })
            .await;
            engine.quit().await;
            outcome?;
        }

        Command::Install => {
            let path = ensure_stockfish_binary(&config).await?;
            println!("{}", path.display());
        }
    }

    Ok(())
}

fn print_annotations(start: &Chess, sans: &[String], annotations: &GameAnnotations, metric: Metric) {
    for line in move_table(start, sans, annotations) {
        println!("{line}");
    }

    let columns = metric.columns();
    println!();
    print!("{:<6}", "Player");
    for quality in columns {
        print!("{:>10}", quality.label());
    }
    println!("{:>10}", if metric == Metric::Wdl { "Avg loss" } else { "Avg CPL" });

    let summary = &annotations.summary;
    for (name, side) in [("White", &summary.white), ("Black", &summary.black)] {
        print!("{name:<6}");
        for quality in columns {
            print!("{:>10}", side.counts.count(*quality));
        }
        if metric == Metric::Wdl {
            println!("{:>10.3}", side.avg_metric);
        } else {
            println!("{:>10}", side.avg_metric.round());
        }
    }

    if let Some(duration) = summary.meta.duration_sec {
        println!("\nAnalysis completed in {duration:.2} seconds.");
    }
}

/// Numbered move rows with annotations looked up by 1-based ply.
fn move_table(start: &Chess, sans: &[String], annotations: &GameAnnotations) -> Vec<String> {
    let mut ply = 1;
    let mut next_cell = |san: &str| {
        if san.is_empty() {
            return String::new();
        }
        let cell = annotated(san, annotations, ply);
        ply += 1;
        cell
    };

    let mut lines = Vec::new();
    for row in move_rows(start, sans) {
        let white = if row.white.is_empty() {
            "...".to_string()
        } else {
            next_cell(&row.white)
        };
        let black = next_cell(&row.black);
        lines.push(format!("{:>3}. {:<18} {}", row.number, white, black).trim_end().to_string());
    }
    lines
}

fn annotated(san: &str, annotations: &GameAnnotations, ply: usize) -> String {
    match annotations.display.get(&ply) {
        Some(label) => format!("{san} {label}"),
        None => san.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_table_from_black_to_move() {
        let start = parse_fen("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 7").unwrap();
        let sans: Vec<String> = ["e5", "Nf3", "Nc6"].iter().map(|s| s.to_string()).collect();
        let annotations = GameAnnotations {
            display: [(1, "?! (80)".to_string()), (3, "?? (400)".to_string())].into(),
            ..GameAnnotations::default()
        };

        let lines = move_table(&start, &sans, &annotations);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("  7. ..."));
        assert!(lines[0].ends_with("e5 ?! (80)"));
        assert!(lines[1].starts_with("  8. Nf3 "));
        assert!(lines[1].ends_with("Nc6 ?? (400)"));
    }
}
