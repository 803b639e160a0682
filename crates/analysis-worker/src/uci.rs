//! UCI output parsing (`info` and `bestmove` lines)

use chess_core::notation::Score;

/// Win/draw/loss statistics in per mille, from the side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wdl {
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
}

impl Wdl {
    /// Swap wins and losses when the side to move is Black.
    pub fn white_pov(self, white_to_move: bool) -> Self {
        if white_to_move {
            self
        } else {
            Self {
                wins: self.losses,
                draws: self.draws,
                losses: self.wins,
            }
        }
    }

    /// `(wins + draws / 2) / total`, `None` for an empty triple.
    pub fn expected_score(self) -> Option<f64> {
        let total = self.wins + self.draws + self.losses;
        if total == 0 {
            return None;
        }
        Some((self.wins as f64 + 0.5 * self.draws as f64) / total as f64)
    }
}

/// Fields of one `info` line that matter for analysis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfoLine {
    pub depth: Option<u32>,
    /// 1-based MultiPV rank (1 when the engine omits it)
    pub multipv: u32,
    pub score: Option<Score>,
    /// Score is only a bound (`lowerbound`/`upperbound`)
    pub bound: bool,
    pub wdl: Option<Wdl>,
    pub pv: Vec<String>,
}

impl InfoLine {
    /// Lines that carry both a score and a PV update the displayed analysis.
    pub fn has_score_and_pv(&self) -> bool {
        self.score.is_some() && !self.pv.is_empty()
    }
}

/// Parse an `info` line. Returns `None` for anything else (including
/// `info string ...` chatter).
pub fn parse_info(line: &str) -> Option<InfoLine> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.first() != Some(&"info") || parts.get(1) == Some(&"string") {
        return None;
    }

    let mut info = InfoLine {
        multipv: 1,
        ..InfoLine::default()
    };

    let mut i = 1;
    while i < parts.len() {
        match parts[i] {
            "depth" => {
                info.depth = parts.get(i + 1).and_then(|v| v.parse().ok());
                i += 2;
            }
            "multipv" => {
                info.multipv = parts
                    .get(i + 1)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1);
                i += 2;
            }
            "score" => {
                let value = parts.get(i + 2).and_then(|v| v.parse::<i32>().ok());
                info.score = match (parts.get(i + 1), value) {
                    (Some(&"cp"), Some(cp)) => Some(Score::Cp(cp)),
                    (Some(&"mate"), Some(mate)) => Some(Score::Mate(mate)),
                    _ => info.score,
                };
                i += 3;
            }
            "lowerbound" | "upperbound" => {
                info.bound = true;
                i += 1;
            }
            "wdl" => {
                let nums: Vec<u32> = parts
                    .iter()
                    .skip(i + 1)
                    .take(3)
                    .filter_map(|v| v.parse().ok())
                    .collect();
                if let [wins, draws, losses] = nums[..] {
                    info.wdl = Some(Wdl {
                        wins,
                        draws,
                        losses,
                    });
                }
                i += 4;
            }
            "pv" => {
                info.pv = parse_pv(&parts[i + 1..]);
                break;
            }
            _ => i += 1,
        }
    }

    Some(info)
}

/// PV moves run to the end of the line or the next non-move keyword.
fn parse_pv(parts: &[&str]) -> Vec<String> {
    parts
        .iter()
        .take_while(|part| !part.starts_with("bmc") && **part != "string")
        .map(|part| part.to_string())
        .collect()
}

/// Parse the move of a `bestmove` line (`None` for `(none)` or other lines).
pub fn parse_bestmove(line: &str) -> Option<Option<String>> {
    let mut parts = line.split_whitespace();
    if parts.next() != Some("bestmove") {
        return None;
    }
    Some(
        parts
            .next()
            .filter(|mv| *mv != "(none)")
            .map(str::to_string),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cp() {
        let line = "info depth 20 seldepth 25 multipv 1 score cp 35 nodes 100000 pv e2e4";
        let info = parse_info(line).unwrap();
        assert_eq!(info.score, Some(Score::Cp(35)));
        assert_eq!(info.depth, Some(20));
        assert_eq!(info.multipv, 1);
    }

    #[test]
    fn test_parse_mate() {
        let line = "info depth 20 score mate 3 nodes 100000 pv e2e4";
        assert_eq!(parse_info(line).unwrap().score, Some(Score::Mate(3)));
    }

    #[test]
    fn test_parse_pv() {
        let line = "info depth 20 score cp 35 pv e2e4 e7e5 g1f3";
        let info = parse_info(line).unwrap();
        assert_eq!(info.pv, vec!["e2e4", "e7e5", "g1f3"]);
        assert!(info.has_score_and_pv());
    }

    #[test]
    fn test_parse_wdl_and_multipv() {
        let line = "info depth 18 multipv 2 score cp -12 lowerbound wdl 30 900 70 nodes 5 pv d2d4";
        let info = parse_info(line).unwrap();
        assert_eq!(info.multipv, 2);
        assert_eq!(info.score, Some(Score::Cp(-12)));
        assert!(info.bound);
        assert_eq!(
            info.wdl,
            Some(Wdl {
                wins: 30,
                draws: 900,
                losses: 70
            })
        );
        assert_eq!(info.pv, vec!["d2d4"]);
    }

    #[test]
    fn test_info_string_is_ignored() {
        assert_eq!(parse_info("info string NNUE evaluation using nn.nnue"), None);
        assert_eq!(parse_info("readyok"), None);
        let bare = parse_info("info depth 1 currmove e2e4").unwrap();
        assert!(!bare.has_score_and_pv());
    }

    #[test]
    fn test_parse_bestmove() {
        assert_eq!(
            parse_bestmove("bestmove e2e4 ponder e7e5"),
            Some(Some("e2e4".to_string()))
        );
        assert_eq!(parse_bestmove("bestmove (none)"), Some(None));
        assert_eq!(parse_bestmove("info depth 3"), None);
    }

    #[test]
    fn test_wdl_expected_score() {
        let wdl = Wdl { wins: 5, draws: 3, losses: 2 };
        assert!((wdl.expected_score().unwrap() - 0.65).abs() < 1e-9);
        let even = Wdl { wins: 1, draws: 2, losses: 1 };
        assert_eq!(even.expected_score(), Some(0.5));
        assert_eq!(Wdl { wins: 0, draws: 0, losses: 0 }.expected_score(), None);
        assert_eq!(wdl.white_pov(false), Wdl { wins: 2, draws: 3, losses: 5 });
    }
}
