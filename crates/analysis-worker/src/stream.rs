//! Streaming analysis of the viewed position.

use std::collections::BTreeMap;
use std::time::Duration;

use chess_core::notation::{fen_of, format_pv_line};
use serde::Serialize;
use shakmaty::{Chess, Color, Position};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::analysis::{clamp_score, score_to_cp, CLAMP_THRESHOLD};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::install::ensure_stockfish_binary;
use crate::session::Ticket;
use crate::stockfish::{EngineOptions, SearchEvent, SearchLimit, StockfishEngine};
use crate::uci::InfoLine;

#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub position: Chess,
    /// Position before the last move, analysed first for the prior score
    pub previous: Option<Chess>,
    pub time_limit: Duration,
    pub depth: Option<u32>,
    pub multipv: u32,
    pub threads: u32,
}

/// One streamed snapshot. Scores are from White's point of view.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamUpdate {
    /// Current score minus prior score, once both are known
    pub delta_cp: Option<i32>,
    pub lines: Vec<String>,
    /// Rank 1 move of the current position (UCI)
    pub best_move: Option<String>,
    pub prev_lines: Option<Vec<String>>,
    pub wdl: Option<f64>,
    pub prev_wdl: Option<f64>,
    pub done: bool,
}

/// Latest rendered line and first move per MultiPV rank.
#[derive(Debug, Default)]
struct RankedLines {
    by_rank: BTreeMap<u32, (String, Option<String>)>,
}

impl RankedLines {
    fn update(&mut self, rank: u32, line: String, first_move: Option<String>) {
        self.by_rank.insert(rank.max(1), (line, first_move));
    }

    fn ordered(&self) -> Vec<String> {
        self.by_rank.values().map(|(line, _)| line.clone()).collect()
    }

    fn best_move(&self) -> Option<String> {
        self.by_rank.get(&1).and_then(|(_, mv)| mv.clone())
    }
}

struct PriorAnalysis {
    cp: i32,
    lines: Vec<String>,
    wdl: Option<f64>,
}

async fn analyse_prior(
    engine: &mut StockfishEngine,
    previous: &Chess,
    limit: &SearchLimit,
    multipv: u32,
) -> Result<Option<PriorAnalysis>, EngineError> {
    let white_to_move = previous.turn() == Color::White;
    let infos = engine
        .analyse_multipv(&fen_of(previous), limit, multipv)
        .await?;

    let Some(top) = infos.first() else {
        return Ok(None);
    };

    let lines = infos
        .iter()
        .filter_map(|info| {
            let score = info.score?.white_pov(white_to_move);
            Some(format_pv_line(previous, score, &info.pv))
        })
        .collect();

    Ok(Some(PriorAnalysis {
        cp: clamp_score(
            score_to_cp(top.score.map(|s| s.white_pov(white_to_move))),
            CLAMP_THRESHOLD,
        ),
        lines,
        wdl: top
            .wdl
            .map(|w| w.white_pov(white_to_move))
            .and_then(|w| w.expected_score()),
    }))
}

enum Step {
    Event(Result<SearchEvent, EngineError>),
    Cancelled,
    TimeUp,
}

/// Analyse `request.position` and report every scored info line through
/// `on_update`. The last report has `done` set, unless the search was
/// cancelled.
pub async fn stream_analysis<F>(
    engine: &mut StockfishEngine,
    request: &StreamRequest,
    cancel: &CancellationToken,
    mut on_update: F,
) -> Result<(), EngineError>
where
    F: FnMut(StreamUpdate),
{
    let limit = SearchLimit::time(request.time_limit).with_depth(request.depth);
    let multipv = request.multipv.max(1);

    let mut prior = None;
    if let Some(previous) = &request.previous {
        match analyse_prior(engine, previous, &limit, multipv).await {
            Ok(analysis) => prior = analysis,
            Err(e) => warn!(error = %e, "Prior position analysis failed"),
        }
    }
    if cancel.is_cancelled() {
        return Ok(());
    }

    let position = &request.position;
    let white_to_move = position.turn() == Color::White;
    let mut snapshot = StreamUpdate {
        prev_lines: prior.as_ref().map(|p| p.lines.clone()),
        prev_wdl: prior.as_ref().and_then(|p| p.wdl),
        ..StreamUpdate::default()
    };
    let mut ranked = RankedLines::default();

    engine.start_search(&fen_of(position), &limit, multipv).await?;
    let deadline = Instant::now() + request.time_limit;

    loop {
        let step = tokio::select! {
            biased;
            _ = cancel.cancelled() => Step::Cancelled,
            _ = tokio::time::sleep_until(deadline) => Step::TimeUp,
            event = engine.next_event() => Step::Event(event),
        };

        match step {
            Step::Cancelled => {
                engine.stop().await?;
                debug!("Streaming analysis cancelled");
                return Ok(());
            }
            Step::TimeUp => {
                engine.stop().await?;
                break;
            }
            Step::Event(event) => match event? {
                SearchEvent::BestMove(_) => break,
                SearchEvent::Info(info) if info.has_score_and_pv() => {
                    apply_info(&mut snapshot, &mut ranked, position, white_to_move, prior.as_ref(), info);
                    on_update(snapshot.clone());
                }
                SearchEvent::Info(_) => {}
            },
        }
    }

    snapshot.done = true;
    on_update(snapshot);
    Ok(())
}

fn apply_info(
    snapshot: &mut StreamUpdate,
    ranked: &mut RankedLines,
    position: &Chess,
    white_to_move: bool,
    prior: Option<&PriorAnalysis>,
    info: InfoLine,
) {
    let Some(score) = info.score.map(|s| s.white_pov(white_to_move)) else {
        return;
    };
    let curr_cp = clamp_score(score_to_cp(Some(score)), CLAMP_THRESHOLD);

    ranked.update(
        info.multipv,
        format_pv_line(position, score, &info.pv),
        info.pv.first().cloned(),
    );

    snapshot.delta_cp = prior.map(|p| curr_cp - p.cp);
    snapshot.lines = ranked.ordered();
    snapshot.best_move = ranked.best_move();
    if info.multipv <= 1 {
        if let Some(expected) = info
            .wdl
            .map(|w| w.white_pov(white_to_move))
            .and_then(|w| w.expected_score())
        {
            snapshot.wdl = Some(expected);
        }
    }
}

/// Centipawn loss of the mover for a White-POV delta.
pub fn mover_cpl(delta_cp: i32, mover_is_white: bool) -> i32 {
    let delta_for_mover = if mover_is_white { delta_cp } else { -delta_cp };
    (-delta_for_mover).max(0)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisProgress {
    pub cpl: Option<i32>,
    pub lines: Vec<String>,
    pub best_move: Option<String>,
    pub prev_lines: Option<Vec<String>>,
    pub wdl: Option<f64>,
    pub prev_wdl: Option<f64>,
    pub done: bool,
}

/// Message from the streaming worker.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisUpdate {
    Progress(AnalysisProgress),
    /// `Engine unavailable: ...`; ends the stream
    Unavailable(String),
}

impl AnalysisUpdate {
    pub fn is_done(&self) -> bool {
        match self {
            AnalysisUpdate::Progress(progress) => progress.done,
            AnalysisUpdate::Unavailable(_) => true,
        }
    }
}

impl AnalysisProgress {
    pub fn from_update(update: StreamUpdate, mover_is_white: bool) -> Self {
        Self {
            cpl: update.delta_cp.map(|d| mover_cpl(d, mover_is_white)),
            lines: update.lines,
            best_move: update.best_move,
            prev_lines: update.prev_lines,
            wdl: update.wdl,
            prev_wdl: update.prev_wdl,
            done: update.done,
        }
    }
}

/// Background task body: resolve and start an engine, stream the position,
/// report through `ticket`.
pub async fn stream_analysis_worker(
    config: EngineConfig,
    request: StreamRequest,
    mover_is_white: bool,
    ticket: Ticket<AnalysisUpdate>,
) {
    let result = async {
        let path = ensure_stockfish_binary(&config).await?;
        let options = EngineOptions {
            threads: request.threads.max(1),
            hash_mb: config.hash_mb,
            show_wdl: true,
            skill_level: None,
        };
        let mut engine = StockfishEngine::with_options(&path, &options).await?;

        let outcome = stream_analysis(&mut engine, &request, ticket.cancel_token(), |update| {
            if ticket.is_cancelled() {
                return;
            }
            ticket.send(AnalysisUpdate::Progress(AnalysisProgress::from_update(
                update,
                mover_is_white,
            )));
        })
        .await;

        engine.quit().await;
        outcome
    }
    .await;

    if let Err(e) = result {
        warn!(generation = ticket.generation(), error = %e, "Streaming analysis failed");
        ticket.send(AnalysisUpdate::Unavailable(format!("Engine unavailable: {e}")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mover_cpl() {
        assert_eq!(mover_cpl(-120, true), 120);
        assert_eq!(mover_cpl(-120, false), 0);
        assert_eq!(mover_cpl(85, false), 85);
        assert_eq!(mover_cpl(40, true), 0);
    }

    #[test]
    fn test_ranked_lines_order_and_best() {
        let mut ranked = RankedLines::default();
        ranked.update(2, "+0.10 — 1. d4".into(), Some("d2d4".into()));
        assert_eq!(ranked.best_move(), None);

        ranked.update(1, "+0.30 — 1. e4".into(), Some("e2e4".into()));
        ranked.update(2, "+0.15 — 1. d4 d5".into(), Some("d2d4".into()));
        assert_eq!(ranked.ordered(), vec!["+0.30 — 1. e4", "+0.15 — 1. d4 d5"]);
        assert_eq!(ranked.best_move().as_deref(), Some("e2e4"));
    }

    #[test]
    fn test_apply_info_tracks_delta_and_wdl() {
        let position = Chess::default();
        let prior = PriorAnalysis {
            cp: 50,
            lines: vec![],
            wdl: Some(0.55),
        };
        let mut snapshot = StreamUpdate::default();
        let mut ranked = RankedLines::default();
        let info = crate::uci::parse_info("info depth 12 multipv 1 score cp -40 wdl 50 600 350 pv e2e4 e7e5")
            .unwrap();

        apply_info(&mut snapshot, &mut ranked, &position, true, Some(&prior), info);

        assert_eq!(snapshot.delta_cp, Some(-90));
        assert_eq!(snapshot.lines, vec!["-0.40 — 1. e4 e5"]);
        assert_eq!(snapshot.best_move.as_deref(), Some("e2e4"));
        assert!((snapshot.wdl.unwrap() - 0.35).abs() < 1e-9);
    }

    #[test]
    fn test_progress_from_update() {
        let update = StreamUpdate {
            delta_cp: Some(200),
            done: true,
            ..StreamUpdate::default()
        };
        let progress = AnalysisProgress::from_update(update, false);
        // Black moved; +200 for White is a 200 cp loss for Black
        assert_eq!(progress.cpl, Some(200));
        assert!(AnalysisUpdate::Progress(progress).is_done());
        assert!(AnalysisUpdate::Unavailable("Engine unavailable: x".into()).is_done());
    }
}
