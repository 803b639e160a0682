//! Stockfish engine wrapper using UCI protocol (async I/O)

use std::fmt::Display;
use std::path::Path;
use std::time::Duration;

use chess_core::notation::Score;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::uci::{parse_bestmove, parse_info, InfoLine, Wdl};

/// How long the engine may take to answer `uci` / `isready`.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Search limit for a `go` command. Unset fields are not sent; with no
/// field set the search runs until `stop`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SearchLimit {
    pub time: Option<Duration>,
    pub depth: Option<u32>,
    pub nodes: Option<u32>,
}

impl SearchLimit {
    pub fn time(time: Duration) -> Self {
        Self {
            time: Some(time),
            ..Self::default()
        }
    }

    pub fn with_depth(mut self, depth: Option<u32>) -> Self {
        self.depth = depth;
        self
    }

    fn go_command(&self) -> String {
        let mut cmd = String::from("go");
        if let Some(time) = self.time {
            cmd.push_str(&format!(" movetime {}", time.as_millis().max(1)));
        }
        if let Some(depth) = self.depth {
            cmd.push_str(&format!(" depth {depth}"));
        }
        if let Some(nodes) = self.nodes {
            cmd.push_str(&format!(" nodes {nodes}"));
        }
        if cmd == "go" {
            cmd.push_str(" infinite");
        }
        cmd
    }
}

/// Options applied once after the handshake.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineOptions {
    pub threads: u32,
    pub hash_mb: u32,
    pub show_wdl: bool,
    /// `Skill Level` 0-20, left at the engine default when `None`
    pub skill_level: Option<u8>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            hash_mb: 64,
            show_wdl: false,
            skill_level: None,
        }
    }
}

/// Final result of one analysed line (scores from the side to move).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisInfo {
    pub multipv: u32,
    pub depth: Option<u32>,
    pub score: Option<Score>,
    pub wdl: Option<Wdl>,
    /// Principal variation in UCI notation
    pub pv: Vec<String>,
}

impl AnalysisInfo {
    fn absorb(&mut self, info: InfoLine) {
        self.multipv = info.multipv;
        if info.depth.is_some() {
            self.depth = info.depth;
        }
        if info.score.is_some() {
            self.score = info.score;
        }
        if info.wdl.is_some() {
            self.wdl = info.wdl;
        }
        if !info.pv.is_empty() {
            self.pv = info.pv;
        }
    }

    pub fn best_move(&self) -> Option<&str> {
        self.pv.first().map(String::as_str)
    }
}

/// Output of a running search.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchEvent {
    Info(InfoLine),
    BestMove(Option<String>),
}

/// Stockfish engine instance
pub struct StockfishEngine {
    process: Child,
    stdin: ChildStdin,
    lines: mpsc::UnboundedReceiver<String>,
    multipv: u32,
    searching: bool,
}

impl StockfishEngine {
    /// Spawn a new Stockfish process and initialize UCI
    pub async fn new(path: &Path) -> Result<Self, EngineError> {
        let mut process = Command::new(path)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EngineError::Stockfish(format!("Failed to spawn {}: {e}", path.display()))
            })?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| EngineError::Stockfish("Stockfish stdin unavailable".into()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| EngineError::Stockfish("Stockfish stdout unavailable".into()))?;

        // Lines are forwarded through a channel so reads can be raced against
        // cancellation without losing partial lines.
        let (tx, lines) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut stdout = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match stdout.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let trimmed = line.trim();
                        debug!(line = trimmed, "SF >");
                        if tx.send(trimmed.to_string()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read from Stockfish");
                        break;
                    }
                }
            }
        });

        let mut engine = Self {
            process,
            stdin,
            lines,
            multipv: 1,
            searching: false,
        };

        engine.send("uci").await?;
        engine.wait_for("uciok").await?;
        engine.is_ready().await?;

        Ok(engine)
    }

    /// Spawn and apply `options`.
    pub async fn with_options(path: &Path, options: &EngineOptions) -> Result<Self, EngineError> {
        let mut engine = Self::new(path).await?;
        engine.configure(options).await?;
        Ok(engine)
    }

    /// Send a command to Stockfish
    async fn send(&mut self, cmd: &str) -> Result<(), EngineError> {
        debug!(cmd, "SF <");
        self.stdin
            .write_all(format!("{cmd}\n").as_bytes())
            .await
            .map_err(|e| EngineError::Stockfish(format!("Failed to write to Stockfish: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| EngineError::Stockfish(format!("Failed to flush stdin: {e}")))?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, EngineError> {
        self.lines
            .recv()
            .await
            .ok_or_else(|| EngineError::Stockfish("Stockfish exited unexpectedly".into()))
    }

    /// Wait for a specific response line
    async fn wait_for(&mut self, expected: &str) -> Result<(), EngineError> {
        let wait = async {
            loop {
                if self.read_line().await? == expected {
                    return Ok::<(), EngineError>(());
                }
            }
        };
        tokio::time::timeout(HANDSHAKE_TIMEOUT, wait)
            .await
            .map_err(|_| EngineError::Stockfish(format!("Timed out waiting for {expected}")))?
    }

    pub async fn is_ready(&mut self) -> Result<(), EngineError> {
        self.send("isready").await?;
        self.wait_for("readyok").await
    }

    pub async fn set_option(&mut self, name: &str, value: impl Display) -> Result<(), EngineError> {
        self.send(&format!("setoption name {name} value {value}")).await
    }

    pub async fn configure(&mut self, options: &EngineOptions) -> Result<(), EngineError> {
        self.set_option("Threads", options.threads.max(1)).await?;
        self.set_option("Hash", options.hash_mb.max(1)).await?;
        if options.show_wdl {
            self.set_option("UCI_ShowWDL", true).await?;
        }
        if let Some(level) = options.skill_level {
            self.set_option("Skill Level", level.min(20)).await?;
        }
        self.is_ready().await
    }

    async fn set_multipv(&mut self, multipv: u32) -> Result<(), EngineError> {
        let multipv = multipv.max(1);
        if multipv != self.multipv {
            self.set_option("MultiPV", multipv).await?;
            self.multipv = multipv;
        }
        Ok(())
    }

    /// Start a search; read its output with [`next_event`](Self::next_event).
    pub async fn start_search(
        &mut self,
        fen: &str,
        limit: &SearchLimit,
        multipv: u32,
    ) -> Result<(), EngineError> {
        if self.searching {
            self.stop().await?;
        }
        self.set_multipv(multipv).await?;
        self.send(&format!("position fen {fen}")).await?;
        self.send(&limit.go_command()).await?;
        self.searching = true;
        Ok(())
    }

    /// Next info or bestmove line of the running search. Cancel-safe.
    pub async fn next_event(&mut self) -> Result<SearchEvent, EngineError> {
        loop {
            let line = self.read_line().await?;
            if let Some(best) = parse_bestmove(&line) {
                self.searching = false;
                return Ok(SearchEvent::BestMove(best));
            }
            if let Some(info) = parse_info(&line) {
                return Ok(SearchEvent::Info(info));
            }
        }
    }

    /// Stop the running search and drain its output up to `bestmove`.
    pub async fn stop(&mut self) -> Result<Option<String>, EngineError> {
        if !self.searching {
            return Ok(None);
        }
        self.send("stop").await?;
        loop {
            if let SearchEvent::BestMove(best) = self.next_event().await? {
                return Ok(best);
            }
        }
    }

    /// Run a search to completion and keep the latest data per MultiPV rank.
    async fn collect(
        &mut self,
        fen: &str,
        limit: &SearchLimit,
        multipv: u32,
    ) -> Result<Vec<AnalysisInfo>, EngineError> {
        self.start_search(fen, limit, multipv).await?;

        let mut lines: Vec<AnalysisInfo> = Vec::new();
        loop {
            match self.next_event().await? {
                SearchEvent::Info(info) => {
                    if info.score.is_none() && info.pv.is_empty() {
                        continue;
                    }
                    let rank = info.multipv.max(1);
                    match lines.iter_mut().find(|l| l.multipv == rank) {
                        Some(entry) => entry.absorb(info),
                        None => {
                            let mut entry = AnalysisInfo::default();
                            entry.absorb(info);
                            entry.multipv = rank;
                            lines.push(entry);
                        }
                    }
                }
                SearchEvent::BestMove(_) => break,
            }
        }

        lines.sort_by_key(|l| l.multipv);
        Ok(lines)
    }

    /// Evaluate a position with a single line.
    pub async fn analyse(&mut self, fen: &str, limit: &SearchLimit) -> Result<AnalysisInfo, EngineError> {
        let lines = self.collect(fen, limit, 1).await?;
        Ok(lines.into_iter().next().unwrap_or_default())
    }

    /// Evaluate a position with multiple PV lines, ordered by rank.
    pub async fn analyse_multipv(
        &mut self,
        fen: &str,
        limit: &SearchLimit,
        multipv: u32,
    ) -> Result<Vec<AnalysisInfo>, EngineError> {
        self.collect(fen, limit, multipv).await
    }

    /// Send quit command and wait for process to exit
    pub async fn quit(&mut self) {
        let _ = self.send("quit").await;
        let _ = tokio::time::timeout(Duration::from_secs(2), self.process.wait()).await;
    }
}

impl Drop for StockfishEngine {
    fn drop(&mut self) {
        // Best-effort synchronous kill in drop
        let _ = self.process.start_kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_go_command() {
        assert_eq!(
            SearchLimit::time(Duration::from_millis(1500)).go_command(),
            "go movetime 1500"
        );
        assert_eq!(
            SearchLimit::time(Duration::from_secs(1))
                .with_depth(Some(12))
                .go_command(),
            "go movetime 1000 depth 12"
        );
        let nodes = SearchLimit {
            nodes: Some(100_000),
            ..SearchLimit::default()
        };
        assert_eq!(nodes.go_command(), "go nodes 100000");
        assert_eq!(SearchLimit::default().go_command(), "go infinite");
    }

    #[test]
    fn test_absorb_keeps_previous_fields() {
        let mut info = AnalysisInfo::default();
        info.absorb(parse_info("info depth 10 score cp 20 wdl 100 800 100 pv e2e4 e7e5").unwrap());
        info.absorb(parse_info("info depth 11 score cp 25").unwrap());
        assert_eq!(info.depth, Some(11));
        assert_eq!(info.score, Some(Score::Cp(25)));
        assert_eq!(info.pv, vec!["e2e4", "e7e5"]);
        assert!(info.wdl.is_some());
        assert_eq!(info.best_move(), Some("e2e4"));
    }
}
