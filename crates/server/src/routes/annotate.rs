use std::time::Instant;

use analysis_worker::analysis::Metric;
use analysis_worker::annotate::{annotate_game, AnnotateRequest, GameAnnotations};
use analysis_worker::evaluate::StockfishLauncher;
use analysis_worker::install::ensure_stockfish_binary;
use analysis_worker::params::EngineParams;
use axum::{Extension, Json};
use chess_core::pgn::parse_pgn;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::AppError;

#[derive(Deserialize)]
pub struct AnnotateBody {
    pub pgn: String,
    #[serde(default)]
    pub metric: Metric,
    pub think_time: Option<f64>,
    pub workers: Option<usize>,
}

/// POST /api/annotate
///
/// Runs to completion; the request is cancelled if the client goes away.
pub async fn annotate(
    Extension(config): Extension<Config>,
    Json(body): Json<AnnotateBody>,
) -> Result<Json<GameAnnotations>, AppError> {
    let game = parse_pgn(&body.pgn)?;
    if game.moves.is_empty() {
        return Err(AppError::BadRequest("Game has no moves to annotate".into()));
    }

    let time_limit = match body.think_time {
        Some(think_time) => EngineParams {
            think_time,
            ..EngineParams::default()
        }
        .clamped()
        .think_duration(),
        None => config.engine.think_time,
    };

    let path = ensure_stockfish_binary(&config.engine).await?;
    let launcher = StockfishLauncher::new(path, config.engine.hash_mb);
    let request = AnnotateRequest {
        start: game.start.clone(),
        moves: game.moves.clone(),
        time_limit,
        workers: body
            .workers
            .unwrap_or(config.engine.annotation_workers)
            .clamp(1, config.engine.annotation_workers.max(1)),
        metric: body.metric,
    };

    // Dropping the handler future drops the guard and stops the engines
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let started = Instant::now();
    tracing::info!(plies = request.moves.len(), metric = %request.metric, "Annotating game");
    let annotations = annotate_game(&launcher, &request, &cancel)
        .await?
        .ok_or_else(|| AppError::BadRequest("Not enough positions to annotate".into()))?;
    tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Annotation request served");

    Ok(Json(annotations))
}
