//! Whole-game annotation: evaluate every position, label each move and
//! summarise both sides.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use shakmaty::{Chess, Color, Move, Position};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::analysis::{
    clamp_score, classify_delta, classify_wdl_delta, mover_is_white, summarize_annotations,
    AnnotationSummary, Metric, MoveQuality, CLAMP_THRESHOLD,
};
use crate::error::EngineError;
use crate::evaluate::{evaluate_positions, EngineLauncher, EvaluateOptions, Evaluations};
use crate::session::Ticket;

#[derive(Debug, Clone)]
pub struct AnnotateRequest {
    pub start: Chess,
    pub moves: Vec<Move>,
    pub time_limit: Duration,
    pub workers: usize,
    pub metric: Metric,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GameAnnotations {
    /// Ply to annotation text, errors only: `"?! (120)"`, `"? (12.5%)"`
    pub display: BTreeMap<usize, String>,
    /// Ply to label; CPL records errors only, WDL every tier except `Ok`
    pub labels: BTreeMap<usize, MoveQuality>,
    pub summary: AnnotationSummary,
    pub evals: Vec<i32>,
    pub wdl: Vec<f64>,
}

/// Message from the annotation worker.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationUpdate {
    Completed(Box<GameAnnotations>),
    Failed(String),
}

/// Label every ply from position evaluations.
///
/// The WDL metric is used only when expected scores are present; otherwise
/// the clamped centipawn evaluations are compared.
pub fn annotations_from_evals(
    evals: &Evaluations,
    metric: Metric,
    total_plies: usize,
    white_moves_first: bool,
) -> GameAnnotations {
    let use_wdl = metric == Metric::Wdl && !evals.wdl.is_empty();
    let mut display = BTreeMap::new();
    let mut labels = BTreeMap::new();
    let mut metric_by_ply = BTreeMap::new();

    for ply in 1..evals.len() {
        let white = mover_is_white(ply, white_moves_first);

        if use_wdl {
            let (Some(prev), Some(curr)) = (evals.wdl.get(ply - 1), evals.wdl.get(ply)) else {
                continue;
            };
            let delta = curr - prev;
            let delta_for_mover = if white { delta } else { -delta };
            let loss = (-delta_for_mover).max(0.0);
            metric_by_ply.insert(ply, loss);

            let quality = classify_wdl_delta(delta_for_mover);
            if quality.is_error() {
                display.insert(ply, format!("{} ({:.1}%)", quality.symbol(), loss * 100.0));
            }
            if quality != MoveQuality::Ok {
                labels.insert(ply, quality);
            }
        } else {
            let prev = clamp_score(evals.cp[ply - 1], CLAMP_THRESHOLD);
            let curr = clamp_score(evals.cp[ply], CLAMP_THRESHOLD);
            let delta = curr - prev;
            let delta_for_mover = if white { delta } else { -delta };
            let cpl = (-delta_for_mover).max(0);
            metric_by_ply.insert(ply, cpl as f64);

            let quality = classify_delta(delta_for_mover);
            if quality.is_error() {
                display.insert(ply, format!("{} ({cpl})", quality.symbol()));
                labels.insert(ply, quality);
            }
        }
    }

    let metric = if use_wdl { Metric::Wdl } else { Metric::Cpl };
    let summary = summarize_annotations(&labels, &metric_by_ply, total_plies, metric, white_moves_first);

    GameAnnotations {
        display,
        labels,
        summary,
        evals: evals.cp.clone(),
        wdl: evals.wdl.clone(),
    }
}

/// Annotate a game. `Ok(None)` when stopped or when fewer than two
/// positions were evaluated.
pub async fn annotate_game<L: EngineLauncher>(
    launcher: &L,
    request: &AnnotateRequest,
    cancel: &CancellationToken,
) -> Result<Option<GameAnnotations>, EngineError> {
    let started = Instant::now();
    let options = EvaluateOptions {
        time_limit: request.time_limit,
        workers: request.workers.max(1),
        include_wdl: request.metric == Metric::Wdl,
    };

    let evals = evaluate_positions(launcher, &request.start, &request.moves, &options, cancel).await?;
    if cancel.is_cancelled() || evals.len() <= 1 {
        return Ok(None);
    }

    let white_moves_first = request.start.turn() == Color::White;
    let mut annotations =
        annotations_from_evals(&evals, request.metric, request.moves.len(), white_moves_first);
    annotations.summary.meta.duration_sec = Some(started.elapsed().as_secs_f64());

    info!(
        plies = request.moves.len(),
        metric = %request.metric,
        errors = annotations.display.len(),
        duration_sec = started.elapsed().as_secs_f64(),
        "Annotation complete"
    );

    Ok(Some(annotations))
}

/// Background task body: annotate and report through `ticket`.
pub async fn annotation_worker<L: EngineLauncher>(
    launcher: L,
    request: AnnotateRequest,
    ticket: Ticket<AnnotationUpdate>,
) {
    match annotate_game(&launcher, &request, ticket.cancel_token()).await {
        Ok(Some(annotations)) => {
            ticket.send(AnnotationUpdate::Completed(Box::new(annotations)));
        }
        Ok(None) => {
            debug!(generation = ticket.generation(), "Annotation stopped without result");
        }
        Err(e) => {
            error!(generation = ticket.generation(), error = %e, "Annotation failed");
            ticket.send(AnnotationUpdate::Failed(e.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cp_evals(cp: &[i32]) -> Evaluations {
        Evaluations {
            cp: cp.to_vec(),
            wdl: Vec::new(),
        }
    }

    #[test]
    fn test_cpl_annotations() {
        // 1. blunder by White (-320), 2. Black inaccuracy (+80 for White)
        let evals = cp_evals(&[20, -300, -220, -230]);
        let annotations = annotations_from_evals(&evals, Metric::Cpl, 3, true);

        assert_eq!(annotations.display.get(&1).map(String::as_str), Some("?? (320)"));
        assert_eq!(annotations.display.get(&2).map(String::as_str), Some("?! (80)"));
        assert_eq!(annotations.display.get(&3), None);
        assert_eq!(annotations.labels.get(&1), Some(&MoveQuality::Blunder));
        assert_eq!(annotations.summary.white.counts.blunder, 1);
        assert_eq!(annotations.summary.white.counts.ok, 1);
        assert_eq!(annotations.summary.black.counts.inaccuracy, 1);
        assert_eq!(annotations.evals, vec![20, -300, -220, -230]);
    }

    #[test]
    fn test_scores_are_clamped_before_delta() {
        // Mate to +1200 is only a 200 cp swing after clamping to +-1000
        let evals = cp_evals(&[9_995, 1_200, 800]);
        let annotations = annotations_from_evals(&evals, Metric::Cpl, 2, true);
        assert!(annotations.display.is_empty());
        assert_eq!(annotations.summary.black.avg_metric, 0.0);

        let collapse = annotations_from_evals(&cp_evals(&[9_995, -9_990]), Metric::Cpl, 1, true);
        assert_eq!(collapse.display.get(&1).map(String::as_str), Some("?? (2000)"));
    }

    #[test]
    fn test_black_to_move_start_flips_mover() {
        // Black moves first; the first ply loses 150 for Black
        let evals = cp_evals(&[0, 150]);
        let annotations = annotations_from_evals(&evals, Metric::Cpl, 1, false);
        assert_eq!(annotations.labels.get(&1), Some(&MoveQuality::Mistake));
        assert_eq!(annotations.summary.black.counts.mistake, 1);
        assert_eq!(annotations.summary.white.moves, 0);
    }

    #[test]
    fn test_wdl_annotations() {
        let evals = Evaluations {
            cp: vec![0, 0, 0, 0],
            wdl: vec![0.50, 0.50, 0.62, 0.40],
        };
        let annotations = annotations_from_evals(&evals, Metric::Wdl, 3, true);

        assert_eq!(annotations.labels.get(&1), Some(&MoveQuality::Best));
        assert_eq!(annotations.labels.get(&2), Some(&MoveQuality::Mistake));
        assert_eq!(annotations.display.get(&2).map(String::as_str), Some("? (12.0%)"));
        assert_eq!(annotations.labels.get(&3), Some(&MoveQuality::Blunder));
        assert_eq!(annotations.summary.meta.metric, Metric::Wdl);
        assert_eq!(annotations.summary.white.estimated_elo, None);
    }

    #[test]
    fn test_wdl_without_values_falls_back_to_cpl() {
        let annotations = annotations_from_evals(&cp_evals(&[0, -100]), Metric::Wdl, 1, true);
        assert_eq!(annotations.summary.meta.metric, Metric::Cpl);
        assert_eq!(annotations.display.get(&1).map(String::as_str), Some("?! (100)"));
    }
}
