//! Evaluation pool: score every position of a game with one engine per worker.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use chess_core::notation::{fen_of, Score};
use shakmaty::{Chess, Color, Move, Position};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::analysis::{score_to_cp, NEUTRAL_EXPECTED_SCORE};
use crate::error::EngineError;
use crate::stockfish::{EngineOptions, SearchLimit, StockfishEngine};
use crate::uci::Wdl;

/// Engine result for one position, from White's point of view.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PositionEval {
    pub score: Option<Score>,
    pub wdl: Option<Wdl>,
}

impl PositionEval {
    /// Normalise raw engine output, which is from the side to move.
    pub fn from_side_to_move(score: Option<Score>, wdl: Option<Wdl>, white_to_move: bool) -> Self {
        Self {
            score: score.map(|s| s.white_pov(white_to_move)),
            wdl: wdl.map(|w| w.white_pov(white_to_move)),
        }
    }

    pub fn cp(&self) -> i32 {
        score_to_cp(self.score)
    }

    pub fn expected_score(&self) -> Option<f64> {
        self.wdl.and_then(Wdl::expected_score)
    }
}

/// Something that can score positions.
pub trait PositionEvaluator: Send {
    fn evaluate(
        &mut self,
        pos: &Chess,
        limit: &SearchLimit,
    ) -> impl Future<Output = Result<PositionEval, EngineError>> + Send;

    fn shutdown(self) -> impl Future<Output = ()> + Send;
}

/// Options for a freshly launched evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSetup {
    pub threads: u32,
    pub show_wdl: bool,
}

/// Starts evaluators. Cloned into every pool worker.
pub trait EngineLauncher: Clone + Send + Sync + 'static {
    type Engine: PositionEvaluator + 'static;

    fn launch(
        &self,
        setup: EngineSetup,
    ) -> impl Future<Output = Result<Self::Engine, EngineError>> + Send;
}

/// Launches Stockfish processes from a resolved binary path.
#[derive(Debug, Clone)]
pub struct StockfishLauncher {
    pub path: PathBuf,
    pub hash_mb: u32,
}

impl StockfishLauncher {
    pub fn new(path: PathBuf, hash_mb: u32) -> Self {
        Self { path, hash_mb }
    }
}

impl EngineLauncher for StockfishLauncher {
    type Engine = StockfishEngine;

    async fn launch(&self, setup: EngineSetup) -> Result<StockfishEngine, EngineError> {
        let options = EngineOptions {
            threads: setup.threads,
            hash_mb: self.hash_mb,
            show_wdl: setup.show_wdl,
            skill_level: None,
        };
        StockfishEngine::with_options(&self.path, &options).await
    }
}

impl PositionEvaluator for StockfishEngine {
    async fn evaluate(&mut self, pos: &Chess, limit: &SearchLimit) -> Result<PositionEval, EngineError> {
        let white_to_move = pos.turn() == Color::White;
        let info = self.analyse(&fen_of(pos), limit).await?;
        Ok(PositionEval::from_side_to_move(info.score, info.wdl, white_to_move))
    }

    async fn shutdown(mut self) {
        self.quit().await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluateOptions {
    pub time_limit: Duration,
    pub workers: usize,
    pub include_wdl: bool,
}

impl Default for EvaluateOptions {
    fn default() -> Self {
        Self {
            time_limit: Duration::from_secs(1),
            workers: 1,
            include_wdl: false,
        }
    }
}

/// White-POV centipawns per position (index 0 is the start position) and,
/// when requested, the matching expected scores.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluations {
    pub cp: Vec<i32>,
    pub wdl: Vec<f64>,
}

impl Evaluations {
    pub fn len(&self) -> usize {
        self.cp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cp.is_empty()
    }
}

/// Evaluate the start position and the position after every move.
///
/// With one worker the positions are scored sequentially and a stop returns
/// what was scored so far. With more workers the positions are split into
/// contiguous chunks, one engine per chunk; a stop while collecting returns
/// an empty result.
pub async fn evaluate_positions<L: EngineLauncher>(
    launcher: &L,
    start: &Chess,
    moves: &[Move],
    options: &EvaluateOptions,
    cancel: &CancellationToken,
) -> Result<Evaluations, EngineError> {
    if cancel.is_cancelled() {
        return Ok(Evaluations::default());
    }

    let limit = SearchLimit::time(options.time_limit);
    let setup = EngineSetup {
        threads: 1,
        show_wdl: options.include_wdl,
    };

    if options.workers <= 1 {
        let mut engine = launcher.launch(setup).await?;
        let result = evaluate_sequential(&mut engine, start, moves, &limit, options, cancel).await;
        engine.shutdown().await;
        return result;
    }

    let mut positions = Vec::with_capacity(moves.len() + 1);
    let mut pos = start.clone();
    positions.push((0usize, pos.clone()));
    for (idx, mv) in moves.iter().enumerate() {
        if cancel.is_cancelled() {
            return Ok(Evaluations::default());
        }
        pos.play_unchecked(mv.clone());
        positions.push((idx + 1, pos.clone()));
    }

    let total = positions.len();
    let workers = options.workers.min(total);
    let chunk_size = total.div_ceil(workers);
    info!(positions = total, workers, chunk_size, "Evaluating positions");

    let mut tasks = JoinSet::new();
    for chunk in positions.chunks(chunk_size) {
        let batch = chunk.to_vec();
        let launcher = launcher.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move { evaluate_batch(launcher, setup, batch, limit, cancel).await });
    }

    let mut cp_by_idx: HashMap<usize, i32> = HashMap::with_capacity(total);
    let mut wdl_by_idx: HashMap<usize, f64> = HashMap::new();

    while let Some(joined) = tasks.join_next().await {
        if cancel.is_cancelled() {
            tasks.abort_all();
            return Ok(Evaluations::default());
        }
        let batch = joined.map_err(|e| EngineError::Analysis(format!("Evaluation task failed: {e}")))??;
        for (idx, eval) in batch {
            cp_by_idx.insert(idx, eval.cp());
            if options.include_wdl {
                wdl_by_idx.insert(idx, eval.expected_score().unwrap_or(NEUTRAL_EXPECTED_SCORE));
            }
        }
    }

    let cp = (0..total)
        .map(|idx| cp_by_idx.get(&idx).copied().unwrap_or(0))
        .collect();
    let wdl = if options.include_wdl {
        (0..total)
            .map(|idx| wdl_by_idx.get(&idx).copied().unwrap_or(NEUTRAL_EXPECTED_SCORE))
            .collect()
    } else {
        Vec::new()
    };

    Ok(Evaluations { cp, wdl })
}

async fn evaluate_sequential<E: PositionEvaluator>(
    engine: &mut E,
    start: &Chess,
    moves: &[Move],
    limit: &SearchLimit,
    options: &EvaluateOptions,
    cancel: &CancellationToken,
) -> Result<Evaluations, EngineError> {
    let mut evals = Evaluations::default();
    let mut pos = start.clone();

    let mut record = |eval: PositionEval| {
        evals.cp.push(eval.cp());
        if options.include_wdl {
            evals
                .wdl
                .push(eval.expected_score().unwrap_or(NEUTRAL_EXPECTED_SCORE));
        }
    };

    record(engine.evaluate(&pos, limit).await?);
    for mv in moves {
        if cancel.is_cancelled() {
            debug!("Sequential evaluation stopped");
            break;
        }
        pos.play_unchecked(mv.clone());
        record(engine.evaluate(&pos, limit).await?);
    }

    Ok(evals)
}

async fn evaluate_batch<L: EngineLauncher>(
    launcher: L,
    setup: EngineSetup,
    batch: Vec<(usize, Chess)>,
    limit: SearchLimit,
    cancel: CancellationToken,
) -> Result<Vec<(usize, PositionEval)>, EngineError> {
    let mut engine = launcher.launch(setup).await?;
    let mut results = Vec::with_capacity(batch.len());
    let mut failure = None;

    for (idx, pos) in &batch {
        if cancel.is_cancelled() {
            break;
        }
        match engine.evaluate(pos, &limit).await {
            Ok(eval) => results.push((*idx, eval)),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    engine.shutdown().await;
    match failure {
        Some(e) => Err(e),
        None => Ok(results),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use chess_core::pgn::parse_pgn;

    use super::*;

    /// Scores a position as ten centipawns per ply played from the initial
    /// position.
    #[derive(Clone, Default)]
    struct FakeLauncher {
        launches: Arc<AtomicUsize>,
    }

    struct FakeEngine;

    fn ply_index(pos: &Chess) -> i32 {
        let black = (pos.turn() == Color::Black) as i32;
        (pos.fullmoves().get() as i32 - 1) * 2 + black
    }

    impl PositionEvaluator for FakeEngine {
        async fn evaluate(&mut self, pos: &Chess, _limit: &SearchLimit) -> Result<PositionEval, EngineError> {
            let ply = ply_index(pos);
            Ok(PositionEval {
                score: Some(Score::Cp(10 * ply)),
                wdl: (ply % 2 == 0).then_some(Wdl {
                    wins: 600,
                    draws: 200,
                    losses: 200,
                }),
            })
        }

        async fn shutdown(self) {}
    }

    impl EngineLauncher for FakeLauncher {
        type Engine = FakeEngine;

        async fn launch(&self, _setup: EngineSetup) -> Result<FakeEngine, EngineError> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            Ok(FakeEngine)
        }
    }

    fn game() -> (Chess, Vec<Move>) {
        let game = parse_pgn("1. e4 e5 2. Nf3 Nc6 3. Bb5 a6 *").unwrap();
        (game.start, game.moves)
    }

    #[tokio::test]
    async fn test_sequential_evaluation() {
        let (start, moves) = game();
        let launcher = FakeLauncher::default();
        let evals = evaluate_positions(
            &launcher,
            &start,
            &moves,
            &EvaluateOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(evals.cp, vec![0, 10, 20, 30, 40, 50, 60]);
        assert!(evals.wdl.is_empty());
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_parallel_matches_sequential_order() {
        let (start, moves) = game();
        let launcher = FakeLauncher::default();
        let options = EvaluateOptions {
            workers: 3,
            include_wdl: true,
            ..EvaluateOptions::default()
        };
        let evals = evaluate_positions(&launcher, &start, &moves, &options, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(evals.cp, vec![0, 10, 20, 30, 40, 50, 60]);
        assert_eq!(evals.wdl, vec![0.7, 0.5, 0.7, 0.5, 0.7, 0.5, 0.7]);
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_workers_capped_by_positions() {
        let (start, moves) = game();
        let launcher = FakeLauncher::default();
        let options = EvaluateOptions {
            workers: 32,
            ..EvaluateOptions::default()
        };
        let evals = evaluate_positions(&launcher, &start, &moves[..1], &options, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(evals.cp, vec![0, 10]);
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_is_empty() {
        let (start, moves) = game();
        let cancel = CancellationToken::new();
        cancel.cancel();
        for workers in [1, 4] {
            let options = EvaluateOptions {
                workers,
                ..EvaluateOptions::default()
            };
            let evals = evaluate_positions(&FakeLauncher::default(), &start, &moves, &options, &cancel)
                .await
                .unwrap();
            assert!(evals.is_empty());
        }
    }

    #[test]
    fn test_side_to_move_checkmate_scores_for_winner() {
        // Black to move and mated after 4. Qxf7#
        let eval = PositionEval::from_side_to_move(
            Some(Score::Mate(0)),
            Some(Wdl {
                wins: 0,
                draws: 0,
                losses: 1000,
            }),
            false,
        );
        assert_eq!(eval.cp(), crate::analysis::MATE_SCORE);
        assert_eq!(eval.expected_score(), Some(1.0));

        let white_mated = PositionEval::from_side_to_move(Some(Score::Mate(0)), None, true);
        assert_eq!(white_mated.cp(), -crate::analysis::MATE_SCORE);
    }
}
