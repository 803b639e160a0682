//! Move classification and summary statistics. Pure functions only, no
//! engine or channel dependencies.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chess_core::notation::Score;
use serde::{Deserialize, Serialize};

/// Mate scores map to this many centipawns minus the distance to mate
pub const MATE_SCORE: i32 = 10_000;

/// Evaluations are clamped to +/- this before deltas are taken
pub const CLAMP_THRESHOLD: i32 = 1_000;

/// Classification thresholds (centipawn loss)
const CPL_INACCURACY: i32 = 70;
const CPL_MISTAKE: i32 = 150;
const CPL_BLUNDER: i32 = 300;

/// Classification thresholds (expected score loss)
const WDL_BEST: f64 = 0.005;
const WDL_EXCELLENT: f64 = 0.02;
const WDL_INACCURACY: f64 = 0.05;
const WDL_MISTAKE: f64 = 0.10;
const WDL_BLUNDER: f64 = 0.20;

/// Expected score used when the engine reports no WDL
pub const NEUTRAL_EXPECTED_SCORE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveQuality {
    Best,
    Excellent,
    Good,
    /// No label (CPL metric below the inaccuracy threshold)
    Ok,
    Inaccuracy,
    Mistake,
    Blunder,
}

impl MoveQuality {
    /// Annotation glyph, empty for non-errors.
    pub fn symbol(self) -> &'static str {
        match self {
            MoveQuality::Inaccuracy => "?!",
            MoveQuality::Mistake => "?",
            MoveQuality::Blunder => "??",
            _ => "",
        }
    }

    /// Column heading / label shown in tables.
    pub fn label(self) -> &'static str {
        match self {
            MoveQuality::Best => "Best",
            MoveQuality::Excellent => "Excellent",
            MoveQuality::Good => "Good",
            MoveQuality::Ok => "OK",
            other => other.symbol(),
        }
    }

    pub fn is_error(self) -> bool {
        matches!(
            self,
            MoveQuality::Inaccuracy | MoveQuality::Mistake | MoveQuality::Blunder
        )
    }
}

impl fmt::Display for MoveQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which evaluation the annotation is based on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cpl,
    Wdl,
}

impl Metric {
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Cpl => "cpl",
            Metric::Wdl => "wdl",
        }
    }

    /// Summary column order for this metric.
    pub fn columns(self) -> &'static [MoveQuality] {
        match self {
            Metric::Cpl => &[
                MoveQuality::Blunder,
                MoveQuality::Mistake,
                MoveQuality::Inaccuracy,
                MoveQuality::Ok,
            ],
            Metric::Wdl => &[
                MoveQuality::Best,
                MoveQuality::Excellent,
                MoveQuality::Good,
                MoveQuality::Inaccuracy,
                MoveQuality::Mistake,
                MoveQuality::Blunder,
            ],
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "cpl" => Ok(Metric::Cpl),
            "wdl" => Ok(Metric::Wdl),
            other => Err(format!("unknown metric '{other}'")),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a move by its evaluation change from the mover's point of view.
pub fn classify_delta(delta_cp: i32) -> MoveQuality {
    let cpl = (-delta_cp).max(0);
    if cpl >= CPL_BLUNDER {
        MoveQuality::Blunder
    } else if cpl >= CPL_MISTAKE {
        MoveQuality::Mistake
    } else if cpl >= CPL_INACCURACY {
        MoveQuality::Inaccuracy
    } else {
        MoveQuality::Ok
    }
}

/// Classify a move by its expected-score change from the mover's point of view.
pub fn classify_wdl_delta(delta_wdl: f64) -> MoveQuality {
    let loss = (-delta_wdl).max(0.0);
    if loss >= WDL_BLUNDER {
        MoveQuality::Blunder
    } else if loss >= WDL_MISTAKE {
        MoveQuality::Mistake
    } else if loss >= WDL_INACCURACY {
        MoveQuality::Inaccuracy
    } else if loss <= WDL_BEST {
        MoveQuality::Best
    } else if loss < WDL_EXCELLENT {
        MoveQuality::Excellent
    } else {
        MoveQuality::Good
    }
}

pub fn clamp_score(score_cp: i32, threshold: i32) -> i32 {
    score_cp.clamp(-threshold, threshold)
}

/// Centipawns for an optional score, 0 when the engine reported none.
pub fn score_to_cp(score: Option<Score>) -> i32 {
    score.map_or(0, |s| s.to_cp(MATE_SCORE))
}

/// Whether the move at 1-based `ply` was played by White.
pub fn mover_is_white(ply: usize, white_moves_first: bool) -> bool {
    (ply % 2 == 1) == white_moves_first
}

pub fn calculate_estimated_elo(avg_cpl: f64) -> f64 {
    3100.0 * (-0.01 * avg_cpl).exp()
}

pub fn calculate_accuracy(avg_cpl: f64) -> f64 {
    let accuracy = 100.0 * (1.0 / (1.0 + avg_cpl.max(0.0) / 100.0)).sqrt();
    accuracy.clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classifications {
    pub best: u32,
    pub excellent: u32,
    pub good: u32,
    pub ok: u32,
    pub inaccuracy: u32,
    pub mistake: u32,
    pub blunder: u32,
}

impl Classifications {
    pub fn record(&mut self, quality: MoveQuality) {
        *self.slot(quality) += 1;
    }

    pub fn count(&self, quality: MoveQuality) -> u32 {
        match quality {
            MoveQuality::Best => self.best,
            MoveQuality::Excellent => self.excellent,
            MoveQuality::Good => self.good,
            MoveQuality::Ok => self.ok,
            MoveQuality::Inaccuracy => self.inaccuracy,
            MoveQuality::Mistake => self.mistake,
            MoveQuality::Blunder => self.blunder,
        }
    }

    fn slot(&mut self, quality: MoveQuality) -> &mut u32 {
        match quality {
            MoveQuality::Best => &mut self.best,
            MoveQuality::Excellent => &mut self.excellent,
            MoveQuality::Good => &mut self.good,
            MoveQuality::Ok => &mut self.ok,
            MoveQuality::Inaccuracy => &mut self.inaccuracy,
            MoveQuality::Mistake => &mut self.mistake,
            MoveQuality::Blunder => &mut self.blunder,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SideSummary {
    pub counts: Classifications,
    pub moves: u32,
    /// Average CPL (centipawns) or average expected-score loss
    pub avg_metric: f64,
    /// Only reported for the CPL metric
    pub estimated_elo: Option<f64>,
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryMeta {
    pub metric: Metric,
    pub duration_sec: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationSummary {
    pub white: SideSummary,
    pub black: SideSummary,
    pub meta: SummaryMeta,
}

/// Per-side label counts and average loss over plies `1..=total_plies`.
/// Plies without a label count as `Ok`.
pub fn summarize_annotations(
    labels: &BTreeMap<usize, MoveQuality>,
    metric_by_ply: &BTreeMap<usize, f64>,
    total_plies: usize,
    metric: Metric,
    white_moves_first: bool,
) -> AnnotationSummary {
    let mut white = SideSummary::default();
    let mut black = SideSummary::default();
    let mut white_total = 0.0;
    let mut black_total = 0.0;

    for ply in 1..=total_plies {
        let (side, total) = if mover_is_white(ply, white_moves_first) {
            (&mut white, &mut white_total)
        } else {
            (&mut black, &mut black_total)
        };
        side.moves += 1;
        *total += metric_by_ply.get(&ply).copied().unwrap_or(0.0);
        side.counts
            .record(labels.get(&ply).copied().unwrap_or(MoveQuality::Ok));
    }

    for (side, total) in [(&mut white, white_total), (&mut black, black_total)] {
        side.avg_metric = if side.moves > 0 {
            total / side.moves as f64
        } else {
            0.0
        };
        if metric == Metric::Cpl {
            side.estimated_elo = Some(calculate_estimated_elo(side.avg_metric));
            side.accuracy = Some(calculate_accuracy(side.avg_metric));
        }
    }

    AnnotationSummary {
        white,
        black,
        meta: SummaryMeta {
            metric,
            duration_sec: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_delta_thresholds() {
        assert_eq!(classify_delta(-70), MoveQuality::Inaccuracy);
        assert_eq!(classify_delta(-150), MoveQuality::Mistake);
        assert_eq!(classify_delta(-300), MoveQuality::Blunder);
        assert_eq!(classify_delta(-69), MoveQuality::Ok);
        assert_eq!(classify_delta(-149), MoveQuality::Inaccuracy);
        assert_eq!(classify_delta(-299), MoveQuality::Mistake);
        assert_eq!(classify_delta(-1000), MoveQuality::Blunder);
        assert_eq!(classify_delta(250), MoveQuality::Ok);
        assert_eq!(classify_delta(0).symbol(), "");
    }

    #[test]
    fn test_classify_wdl_delta_thresholds() {
        assert_eq!(classify_wdl_delta(0.01), MoveQuality::Best);
        assert_eq!(classify_wdl_delta(-0.005), MoveQuality::Best);
        assert_eq!(classify_wdl_delta(-0.01), MoveQuality::Excellent);
        assert_eq!(classify_wdl_delta(-0.049), MoveQuality::Good);
        assert_eq!(classify_wdl_delta(-0.05), MoveQuality::Inaccuracy);
        assert_eq!(classify_wdl_delta(-0.10), MoveQuality::Mistake);
        assert_eq!(classify_wdl_delta(-0.20), MoveQuality::Blunder);
        assert_eq!(classify_wdl_delta(-0.05).symbol(), "?!");
    }

    #[test]
    fn test_labels() {
        assert_eq!(MoveQuality::Blunder.label(), "??");
        assert_eq!(MoveQuality::Ok.label(), "OK");
        assert_eq!(MoveQuality::Excellent.to_string(), "Excellent");
        assert!(MoveQuality::Mistake.is_error());
        assert!(!MoveQuality::Good.is_error());
    }

    #[test]
    fn test_clamp_and_score_to_cp() {
        assert_eq!(clamp_score(5000, CLAMP_THRESHOLD), 1000);
        assert_eq!(clamp_score(-5000, CLAMP_THRESHOLD), -1000);
        assert_eq!(clamp_score(42, CLAMP_THRESHOLD), 42);
        assert_eq!(score_to_cp(None), 0);
        assert_eq!(score_to_cp(Some(Score::Mate(2))), 9_998);
        assert_eq!(score_to_cp(Some(Score::Cp(-31))), -31);
    }

    #[test]
    fn test_metric_parsing() {
        assert_eq!("WDL".parse::<Metric>().unwrap(), Metric::Wdl);
        assert_eq!("".parse::<Metric>().unwrap(), Metric::Cpl);
        assert!("elo".parse::<Metric>().is_err());
    }

    #[test]
    fn test_mover_is_white() {
        assert!(mover_is_white(1, true));
        assert!(!mover_is_white(2, true));
        assert!(!mover_is_white(1, false));
        assert!(mover_is_white(2, false));
    }

    #[test]
    fn test_calculate_accuracy() {
        assert!((calculate_accuracy(0.0) - 100.0).abs() < 0.1);
        assert!((calculate_accuracy(25.0) - 89.4).abs() < 1.0);
        assert!((calculate_accuracy(100.0) - 70.7).abs() < 1.0);
        assert!((calculate_estimated_elo(0.0) - 3100.0).abs() < 1e-9);
    }

    #[test]
    fn test_summarize_annotations() {
        let labels = BTreeMap::from([(1, MoveQuality::Blunder), (4, MoveQuality::Inaccuracy)]);
        let metric = BTreeMap::from([(1, 400.0), (2, 10.0), (3, 0.0), (4, 80.0)]);
        let summary = summarize_annotations(&labels, &metric, 5, Metric::Cpl, true);

        assert_eq!(summary.white.moves, 3);
        assert_eq!(summary.black.moves, 2);
        assert_eq!(summary.white.counts.blunder, 1);
        assert_eq!(summary.white.counts.ok, 2);
        assert_eq!(summary.black.counts.inaccuracy, 1);
        assert_eq!(summary.black.counts.ok, 1);
        assert!((summary.white.avg_metric - 400.0 / 3.0).abs() < 1e-9);
        assert!((summary.black.avg_metric - 45.0).abs() < 1e-9);
        assert!(summary.white.estimated_elo.is_some());
        assert_eq!(summary.meta.metric, Metric::Cpl);
    }

    #[test]
    fn test_summarize_black_first_and_wdl() {
        let labels = BTreeMap::from([(1, MoveQuality::Best), (2, MoveQuality::Mistake)]);
        let summary = summarize_annotations(&labels, &BTreeMap::new(), 2, Metric::Wdl, false);
        assert_eq!(summary.black.counts.best, 1);
        assert_eq!(summary.white.counts.mistake, 1);
        assert_eq!(summary.white.estimated_elo, None);
        assert_eq!(summary.black.avg_metric, 0.0);
    }
}
