//! Per-connection viewer state: the loaded game, navigation, live analysis
//! and annotation results.

use std::collections::BTreeMap;
use std::fmt;

use analysis_worker::analysis::{classify_delta, classify_wdl_delta, AnnotationSummary, Metric, MoveQuality};
use analysis_worker::annotate::AnnotationUpdate;
use analysis_worker::stream::AnalysisUpdate;
use chess_core::game_data::{extract_game_info, move_rows, GameInfo, MoveRow};
use chess_core::notation::{extract_first_pv_move, fen_of, pv_line_score, uci_of};
use chess_core::pgn::{parse_pgn, ParsedGame, PgnError};
use serde::Serialize;
use shakmaty::san::San;
use shakmaty::{Chess, Color, Position};

/// Live CPL readout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EvalStatus {
    #[default]
    Idle,
    Pending,
    Cpl(i32),
    Unavailable(String),
}

impl fmt::Display for EvalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalStatus::Idle => f.write_str("CPL: --"),
            EvalStatus::Pending => f.write_str("CPL: …"),
            EvalStatus::Cpl(cpl) => write!(f, "CPL: {cpl}"),
            EvalStatus::Unavailable(message) => f.write_str(message),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationStatus {
    #[default]
    Idle,
    Running,
}

/// Position to stream after a ply or parameter change.
#[derive(Debug, Clone)]
pub struct EvalTarget {
    pub position: Chess,
    pub previous: Option<Chess>,
    pub mover_is_white: bool,
}

/// Best-move arrow in UCI square names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Arrow {
    pub from: String,
    pub to: String,
}

impl Arrow {
    fn from_uci(uci: &str) -> Option<Self> {
        let from = uci.get(0..2)?;
        let to = uci.get(2..4)?;
        Some(Self {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ViewerState {
    pub game: Option<ParsedGame>,
    pub ply: usize,
    pub eval: EvalStatus,
    pub pv: Vec<String>,
    pub prev_pv: Vec<String>,
    pub wdl: Option<f64>,
    pub prev_wdl: Option<f64>,
    pub analysis_ready: bool,
    pub analysis_done: bool,
    pub annotations: BTreeMap<usize, String>,
    pub label_annotations: BTreeMap<usize, MoveQuality>,
    pub summary: Option<AnnotationSummary>,
    pub annotation_status: AnnotationStatus,
    pub annotation_error: Option<String>,
    pub evals: Vec<i32>,
    pub wdl_scores: Vec<f64>,
    pub engine_move: Option<String>,
    /// Best move and done flag of the running analysis while its position
    /// is out of view
    hidden_analysis: Option<(Option<String>, bool)>,
    pub info: GameInfo,
    pub metric: Metric,
}

impl ViewerState {
    /// Clear everything except the chosen metric.
    pub fn reset(&mut self) {
        let metric = self.metric;
        *self = Self {
            metric,
            ..Self::default()
        };
    }

    /// Load a PGN text. Blank input leaves an empty viewer; a parse error
    /// leaves an empty viewer and is returned.
    pub fn load_pgn(&mut self, pgn: &str) -> Result<(), PgnError> {
        self.reset();
        if pgn.trim().is_empty() {
            return Ok(());
        }

        let game = parse_pgn(pgn)?;
        self.info = extract_game_info(Some(&game));
        self.game = Some(game);
        self.ply = 0;
        self.analysis_ready = true;
        self.analysis_done = false;
        Ok(())
    }

    pub fn total_plies(&self) -> usize {
        self.game.as_ref().map_or(0, |g| g.moves.len())
    }

    pub fn sans(&self) -> &[String] {
        self.game.as_ref().map_or(&[], |g| g.sans.as_slice())
    }

    /// Move to `ply`, clamped to the game. Returns whether the ply changed.
    pub fn set_ply(&mut self, ply: i64) -> bool {
        let ply = ply.clamp(0, self.total_plies() as i64) as usize;
        if ply == self.ply {
            return false;
        }
        self.ply = ply;
        true
    }

    pub fn step(&mut self, delta: i64) -> bool {
        self.set_ply(self.ply as i64 + delta)
    }

    pub fn board_at(&self, ply: usize) -> Chess {
        chess_core::game_data::board_at_ply(self.game.as_ref(), ply)
    }

    pub fn current_board(&self) -> Chess {
        self.board_at(self.ply)
    }

    fn white_moves_first(&self) -> bool {
        self.game
            .as_ref()
            .map_or(true, |g| g.start.turn() == Color::White)
    }

    /// Analysis follows ply changes only once a game is loaded.
    pub fn eval_target(&self) -> Option<EvalTarget> {
        if !self.analysis_ready {
            return None;
        }
        let previous = (self.ply > 0).then(|| self.board_at(self.ply - 1));
        let mover_is_white = previous
            .as_ref()
            .map_or(true, |prev| prev.turn() == Color::White);
        Some(EvalTarget {
            position: self.current_board(),
            previous,
            mover_is_white,
        })
    }

    /// A ply change hides the shown best move. It is set aside until the
    /// next analysis starts, in case the same position comes back.
    pub fn invalidate_analysis(&mut self) {
        if self.hidden_analysis.is_none() {
            self.hidden_analysis = Some((self.engine_move.take(), self.analysis_done));
            self.analysis_done = false;
        }
    }

    /// Show the analysis hidden by [`invalidate_analysis`](Self::invalidate_analysis)
    /// again. Returns whether there was one.
    pub fn restore_analysis(&mut self) -> bool {
        let Some((engine_move, done)) = self.hidden_analysis.take() else {
            return false;
        };
        self.engine_move = engine_move;
        self.analysis_done = done;
        true
    }

    /// Clear live analysis before a new streaming request.
    pub fn begin_eval(&mut self) {
        self.eval = EvalStatus::Pending;
        self.pv.clear();
        self.prev_pv.clear();
        self.wdl = None;
        self.prev_wdl = None;
        self.analysis_done = false;
        self.engine_move = None;
        self.hidden_analysis = None;
    }

    /// Apply drained current-generation messages. The latest message sets
    /// the readout; any finished message marks the analysis done.
    pub fn apply_analysis(&mut self, updates: Vec<AnalysisUpdate>) -> bool {
        let complete = updates.iter().any(AnalysisUpdate::is_done);
        let Some(latest) = updates.into_iter().last() else {
            return false;
        };

        match latest {
            AnalysisUpdate::Unavailable(message) => {
                self.eval = EvalStatus::Unavailable(message);
                self.pv.clear();
            }
            AnalysisUpdate::Progress(progress) => {
                self.eval = match progress.cpl {
                    Some(cpl) => EvalStatus::Cpl(cpl),
                    None => EvalStatus::Idle,
                };
                self.pv = progress.lines;
                if let Some(prev_lines) = progress.prev_lines {
                    self.prev_pv = prev_lines;
                }
                if progress.best_move.is_some() {
                    match &mut self.hidden_analysis {
                        Some((hidden, _)) => *hidden = progress.best_move,
                        None => self.engine_move = progress.best_move,
                    }
                }
                if progress.wdl.is_some() {
                    self.wdl = progress.wdl;
                }
                if progress.prev_wdl.is_some() {
                    self.prev_wdl = progress.prev_wdl;
                }
            }
        }
        if complete {
            match &mut self.hidden_analysis {
                Some((_, done)) => *done = true,
                None => self.analysis_done = true,
            }
        }
        true
    }

    /// Prepare for an annotation run. Returns `false` when there is nothing
    /// to annotate.
    pub fn begin_annotation(&mut self) -> bool {
        if !self.analysis_ready || self.game.is_none() {
            return false;
        }
        if self.total_plies() == 0 {
            self.clear_annotations();
            return false;
        }
        self.summary = None;
        self.annotation_error = None;
        self.annotation_status = AnnotationStatus::Running;
        true
    }

    fn clear_annotations(&mut self) {
        self.annotations.clear();
        self.label_annotations.clear();
        self.summary = None;
        self.evals.clear();
        self.wdl_scores.clear();
        self.annotation_status = AnnotationStatus::Idle;
    }

    pub fn apply_annotation(&mut self, update: Option<AnnotationUpdate>) -> bool {
        let Some(update) = update else {
            return false;
        };
        match update {
            AnnotationUpdate::Completed(result) => {
                let result = *result;
                self.annotations = result.display;
                self.label_annotations = result.labels;
                self.summary = Some(result.summary);
                self.evals = result.evals;
                self.wdl_scores = result.wdl;
                self.annotation_error = None;
            }
            AnnotationUpdate::Failed(message) => {
                self.clear_annotations();
                self.annotation_error = Some(message);
            }
        }
        self.annotation_status = AnnotationStatus::Idle;
        true
    }

    /// Best move of the previous position and of the current one, once the
    /// analysis has finished.
    pub fn arrows(&self) -> Vec<Arrow> {
        let mut arrows: Vec<Arrow> = Vec::new();
        if !self.analysis_done {
            return arrows;
        }

        if self.ply > 0 {
            let prior_best = self
                .prev_pv
                .first()
                .and_then(|line| extract_first_pv_move(line))
                .and_then(|san| {
                    let prev = self.board_at(self.ply - 1);
                    let mv = san.parse::<San>().ok()?.to_move(&prev).ok()?;
                    Some(uci_of(&mv))
                });
            if let Some(arrow) = prior_best.as_deref().and_then(Arrow::from_uci) {
                arrows.push(arrow);
            }
        }

        if let Some(arrow) = self.engine_move.as_deref().and_then(Arrow::from_uci) {
            if !arrows.contains(&arrow) {
                arrows.push(arrow);
            }
        }
        arrows
    }

    pub fn eval_line(&self) -> String {
        let first_move_number = self
            .game
            .as_ref()
            .map_or(1, |g| g.start.fullmoves().get());
        format_eval_line(&EvalLineInput {
            eval: &self.eval,
            ply: self.ply,
            sans: self.sans(),
            labels: &self.label_annotations,
            pv_lines: &self.pv,
            wdl: self.wdl,
            metric: self.metric,
            wdl_scores: &self.wdl_scores,
            prev_wdl: self.prev_wdl,
            white_moves_first: self.white_moves_first(),
            first_move_number,
        })
    }

    pub fn snapshot(&self) -> ViewerSnapshot {
        let last_move = self
            .game
            .as_ref()
            .filter(|_| self.ply > 0)
            .and_then(|g| g.moves.get(self.ply - 1))
            .map(uci_of);

        ViewerSnapshot {
            fen: fen_of(&self.current_board()),
            ply: self.ply,
            total_plies: self.total_plies(),
            sans: self.sans().to_vec(),
            move_rows: move_rows(&self.board_at(0), self.sans()),
            last_move,
            eval: self.eval.to_string(),
            eval_line: self.eval_line(),
            pv: self.pv.clone(),
            prev_pv: self.prev_pv.clone(),
            wdl: self.wdl,
            prev_wdl: self.prev_wdl,
            analysis_ready: self.analysis_ready,
            analysis_done: self.analysis_done,
            engine_move: self.engine_move.clone(),
            arrows: self.arrows(),
            annotations: self.annotations.clone(),
            label_annotations: self
                .label_annotations
                .iter()
                .map(|(ply, quality)| (*ply, quality.label().to_string()))
                .collect(),
            summary: self.summary.clone(),
            summary_columns: self
                .metric
                .columns()
                .iter()
                .map(|q| q.label().to_string())
                .collect(),
            annotation_status: self.annotation_status,
            annotation_error: self.annotation_error.clone(),
            evals: self.evals.clone(),
            wdl_scores: self.wdl_scores.clone(),
            metric: self.metric,
            info: self.info.clone(),
        }
    }
}

/// Everything the client renders for the viewer.
#[derive(Debug, Clone, Serialize)]
pub struct ViewerSnapshot {
    pub fen: String,
    pub ply: usize,
    pub total_plies: usize,
    pub sans: Vec<String>,
    pub move_rows: Vec<MoveRow>,
    pub last_move: Option<String>,
    pub eval: String,
    pub eval_line: String,
    pub pv: Vec<String>,
    pub prev_pv: Vec<String>,
    pub wdl: Option<f64>,
    pub prev_wdl: Option<f64>,
    pub analysis_ready: bool,
    pub analysis_done: bool,
    pub engine_move: Option<String>,
    pub arrows: Vec<Arrow>,
    pub annotations: BTreeMap<usize, String>,
    pub label_annotations: BTreeMap<usize, String>,
    pub summary: Option<AnnotationSummary>,
    pub summary_columns: Vec<String>,
    pub annotation_status: AnnotationStatus,
    pub annotation_error: Option<String>,
    pub evals: Vec<i32>,
    pub wdl_scores: Vec<f64>,
    pub metric: Metric,
    pub info: GameInfo,
}

pub struct EvalLineInput<'a> {
    pub eval: &'a EvalStatus,
    pub ply: usize,
    pub sans: &'a [String],
    pub labels: &'a BTreeMap<usize, MoveQuality>,
    pub pv_lines: &'a [String],
    pub wdl: Option<f64>,
    pub metric: Metric,
    pub wdl_scores: &'a [f64],
    pub prev_wdl: Option<f64>,
    pub white_moves_first: bool,
    pub first_move_number: u32,
}

/// `"{n}. {san} | {label} | Eval: {eval} | CPL: {cpl} | ES: {es}"`
pub fn format_eval_line(input: &EvalLineInput<'_>) -> String {
    let (cpl_display, cpl_value) = match input.eval {
        EvalStatus::Unavailable(message) => return message.clone(),
        EvalStatus::Cpl(cpl) => (cpl.to_string(), Some(*cpl)),
        EvalStatus::Pending => ("…".to_string(), None),
        EvalStatus::Idle => ("--".to_string(), None),
    };

    let mut move_prefix = String::new();
    let mut move_text = "--".to_string();
    let mut annotation = "--".to_string();
    let mut eval_display = "--".to_string();
    let mut es_display = "--".to_string();

    let ply = input.ply;
    if ply > 0 && ply <= input.sans.len() {
        let index = ply - 1 + usize::from(!input.white_moves_first);
        let move_no = input.first_move_number as usize + index / 2;
        let mover_is_white = index % 2 == 0;
        move_prefix = if mover_is_white {
            format!("{move_no}. ")
        } else {
            format!("{move_no}... ")
        };
        move_text = input.sans[ply - 1].clone();

        annotation = match input.metric {
            Metric::Cpl => cpl_value
                .map_or(MoveQuality::Ok, |cpl| classify_delta(-cpl))
                .label()
                .to_string(),
            Metric::Wdl => {
                let label_from = |curr: Option<f64>, prev: Option<f64>| {
                    let delta = curr? - prev?;
                    let delta_for_mover = if mover_is_white { delta } else { -delta };
                    Some(classify_wdl_delta(delta_for_mover).label().to_string())
                };
                label_from(input.wdl, input.prev_wdl)
                    .or_else(|| {
                        label_from(
                            input.wdl_scores.get(ply).copied(),
                            input.wdl_scores.get(ply - 1).copied(),
                        )
                    })
                    .or_else(|| input.labels.get(&ply).map(|q| q.label().to_string()))
                    .unwrap_or_else(|| "--".to_string())
            }
        };

        if let Some(score) = input.pv_lines.first().and_then(|line| pv_line_score(line)) {
            eval_display = score.to_string();
        }

        if let Some(wdl) = input.wdl {
            es_display = format!("{wdl:.2}");
        }
    }

    format!("{move_prefix}{move_text} | {annotation} | Eval: {eval_display} | CPL: {cpl_display} | ES: {es_display}")
}
