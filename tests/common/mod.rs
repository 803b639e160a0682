//! Shared helpers: scripted engines and a gate for tests that need Stockfish.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use analysis_worker::error::EngineError;
use analysis_worker::evaluate::{EngineLauncher, EngineSetup, PositionEval, PositionEvaluator};
use analysis_worker::stockfish::SearchLimit;
use analysis_worker::uci::Wdl;
use chess_core::notation::Score;
use shakmaty::{Chess, Color, Position};

/// Half-moves played since the initial position.
pub fn ply_index(pos: &Chess) -> i32 {
    let black = (pos.turn() == Color::Black) as i32;
    (pos.fullmoves().get() as i32 - 1) * 2 + black
}

/// Engine that scores each position from a script indexed by ply, after an
/// optional delay. Script values are from White's point of view; the engine
/// reports them from the side to move like a UCI engine does.
#[derive(Clone, Default)]
pub struct ScriptedLauncher {
    pub scores: Arc<Vec<i32>>,
    /// Ply at which the side to move is checkmated (`score mate 0`)
    pub mated_at: Option<usize>,
    pub delay: Duration,
    pub launches: Arc<AtomicUsize>,
    pub evaluations: Arc<AtomicUsize>,
}

impl ScriptedLauncher {
    pub fn new(scores: &[i32]) -> Self {
        Self {
            scores: Arc::new(scores.to_vec()),
            ..Self::default()
        }
    }

    pub fn with_mate_at(mut self, ply: usize) -> Self {
        self.mated_at = Some(ply);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }
}

pub struct ScriptedEngine {
    launcher: ScriptedLauncher,
    show_wdl: bool,
}

impl PositionEvaluator for ScriptedEngine {
    async fn evaluate(&mut self, pos: &Chess, _limit: &SearchLimit) -> Result<PositionEval, EngineError> {
        if !self.launcher.delay.is_zero() {
            tokio::time::sleep(self.launcher.delay).await;
        }
        self.launcher.evaluations.fetch_add(1, Ordering::SeqCst);

        let ply = ply_index(pos) as usize;
        let white_to_move = pos.turn() == Color::White;
        let (score, wins) = if self.launcher.mated_at == Some(ply) {
            (Score::Mate(0), 0)
        } else {
            let cp = self.launcher.scores.get(ply).copied().unwrap_or(0);
            let cp = if white_to_move { cp } else { -cp };
            // Expected score tracks the centipawn script: +100 cp is +0.1
            (Score::Cp(cp), (500 + cp).clamp(0, 1000) as u32)
        };
        let wdl = self.show_wdl.then_some(Wdl {
            wins,
            draws: 0,
            losses: 1000 - wins,
        });
        Ok(PositionEval::from_side_to_move(Some(score), wdl, white_to_move))
    }

    async fn shutdown(self) {}
}

impl EngineLauncher for ScriptedLauncher {
    type Engine = ScriptedEngine;

    async fn launch(&self, setup: EngineSetup) -> Result<ScriptedEngine, EngineError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedEngine {
            launcher: self.clone(),
            show_wdl: setup.show_wdl,
        })
    }
}

/// Engine binary for tests that run Stockfish, from `STOCKFISH_PATH`.
pub fn stockfish_path() -> Option<PathBuf> {
    std::env::var_os("STOCKFISH_PATH")
        .map(PathBuf::from)
        .filter(|path| path.is_file())
}
