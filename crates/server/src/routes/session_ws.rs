/// WebSocket viewer session
///
/// One connection owns one viewer: the loaded game, a streaming analysis
/// worker, an annotation worker and a play-mode board. Worker output is
/// drained on timers and pushed to the client as full state snapshots.

use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
    Extension,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use analysis_worker::analysis::Metric;
use analysis_worker::annotate::{annotation_worker, AnnotateRequest, AnnotationUpdate};
use analysis_worker::config::EngineConfig;
use analysis_worker::error::EngineError;
use analysis_worker::evaluate::StockfishLauncher;
use analysis_worker::install::ensure_stockfish_binary;
use analysis_worker::params::EngineParams;
use analysis_worker::play::{
    best_move_uci, engine_best_move, format_engine_eval, EngineMove, EngineSide, PlayBoard,
    UserMoveOutcome,
};
use analysis_worker::session::GenerationSlot;
use analysis_worker::stream::{stream_analysis_worker, AnalysisUpdate, StreamRequest};
use chess_core::game_data::{move_rows, MoveRow};
use chess_core::notation::{fen_of, uci_of};
use shakmaty::Chess;

use crate::config::Config;
use crate::viewer::{ViewerSnapshot, ViewerState};

const EVAL_DEBOUNCE: Duration = Duration::from_millis(200);
const EVAL_DRAIN_INTERVAL: Duration = Duration::from_millis(200);
const ANNOTATION_DRAIN_INTERVAL: Duration = Duration::from_millis(400);

/// MultiPV used when the engine picks a play-mode reply at full strength
const PLAY_MULTIPV: u32 = 3;

// ---- Message types ----

/// Client → Server messages
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    LoadPgn {
        pgn: String,
    },
    SetPly {
        ply: i64,
    },
    Navigate {
        to: NavTarget,
    },
    SetParams {
        think_time: Option<String>,
        threads: Option<String>,
        multipv: Option<String>,
    },
    SetMetric {
        metric: Metric,
    },
    Annotate,
    PlayMove {
        from: String,
        to: String,
    },
    PlayReset,
    SetEngineSide {
        side: EngineSide,
    },
    /// `None` plays at full strength
    SetSkill {
        level: Option<u8>,
    },
    /// Open the play-mode game in the viewer at its last ply
    AnalysePlay,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum NavTarget {
    First,
    Back2,
    Prev,
    Next,
    Forward2,
    Last,
}

/// Server → Client messages
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    State {
        viewer: Box<ViewerSnapshot>,
        params: EngineParams,
    },
    Play(PlaySnapshot),
    Error {
        message: String,
    },
}

#[derive(Debug, Serialize)]
struct PlaySnapshot {
    fen: String,
    last_move: Option<String>,
    sans: Vec<String>,
    move_rows: Vec<MoveRow>,
    pgn: String,
    engine_side: EngineSide,
    skill_level: Option<u8>,
    thinking: bool,
    game_over: bool,
    eval: String,
    outcome: Option<UserMoveOutcome>,
}

/// Engine reply for the position `fen`.
struct PlayReply {
    fen: String,
    position: Chess,
    result: Result<EngineMove, EngineError>,
}

/// Identity of a streaming request; an identical request is not repeated.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AnalysisKey {
    fen: String,
    multipv: u32,
    think_time_bits: u64,
    threads: u32,
}

// ---- WebSocket handler ----

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(config): Extension<Config>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, config))
}

async fn handle_socket(socket: WebSocket, config: Config) {
    let (mut sender, mut receiver) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
    let mut session = Session::new(config.engine, reply_tx);

    let mut eval_drain = tokio::time::interval(EVAL_DRAIN_INTERVAL);
    eval_drain.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut annotation_drain = tokio::time::interval(ANNOTATION_DRAIN_INTERVAL);
    annotation_drain.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Viewer session opened");
    let greeting = [session.state_message(), session.play_message(None)];
    for msg in &greeting {
        if send_msg(&mut sender, msg).await.is_err() {
            return;
        }
    }

    loop {
        let eval_due = session.eval_due;
        let outgoing = tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => session.handle_text(text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!(error = %e, "WebSocket receive failed");
                    break;
                }
            },
            _ = eval_drain.tick() => session.drain_analysis(),
            _ = annotation_drain.tick() => session.drain_annotation(),
            _ = wait_until(eval_due) => session.start_eval(),
            Some(reply) = reply_rx.recv() => session.apply_engine_reply(reply),
        };

        let mut closed = false;
        for msg in &outgoing {
            if send_msg(&mut sender, msg).await.is_err() {
                closed = true;
                break;
            }
        }
        if closed {
            break;
        }
    }

    session.shutdown().await;
    info!("Viewer session closed");
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ---- Helper: send message ----

async fn send_msg(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> Result<()> {
    let json = serde_json::to_string(msg)?;
    sender.send(Message::Text(json.into())).await?;
    Ok(())
}

// ---- Session state ----

struct Session {
    engine: EngineConfig,
    viewer: ViewerState,
    params: EngineParams,
    eval_slot: GenerationSlot<AnalysisUpdate>,
    annotation_slot: GenerationSlot<AnnotationUpdate>,
    eval_due: Option<Instant>,
    last_analysis_key: Option<AnalysisKey>,
    play: PlayBoard,
    engine_side: EngineSide,
    skill_level: Option<u8>,
    play_eval: String,
    play_task: Option<JoinHandle<()>>,
    replies: mpsc::UnboundedSender<PlayReply>,
}

impl Session {
    fn new(engine: EngineConfig, replies: mpsc::UnboundedSender<PlayReply>) -> Self {
        Self {
            engine,
            viewer: ViewerState::default(),
            params: EngineParams::default(),
            eval_slot: GenerationSlot::new(),
            annotation_slot: GenerationSlot::new(),
            eval_due: None,
            last_analysis_key: None,
            play: PlayBoard::new(),
            engine_side: EngineSide::default(),
            skill_level: None,
            play_eval: format_engine_eval(&Chess::default(), None, &[]),
            play_task: None,
            replies,
        }
    }

    async fn handle_text(&mut self, text: &str) -> Vec<ServerMessage> {
        let msg: ClientMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                return vec![ServerMessage::Error {
                    message: format!("Invalid message: {e}"),
                }]
            }
        };
        debug!(?msg, "Client message");

        match msg {
            ClientMessage::LoadPgn { pgn } => self.load_pgn(&pgn).await,
            ClientMessage::SetPly { ply } => self.navigate(|viewer| viewer.set_ply(ply)),
            ClientMessage::Navigate { to } => self.navigate(|viewer| match to {
                NavTarget::First => viewer.set_ply(0),
                NavTarget::Back2 => viewer.step(-2),
                NavTarget::Prev => viewer.step(-1),
                NavTarget::Next => viewer.step(1),
                NavTarget::Forward2 => viewer.step(2),
                NavTarget::Last => viewer.set_ply(viewer.total_plies() as i64),
            }),
            ClientMessage::SetParams {
                think_time,
                threads,
                multipv,
            } => {
                let think_time = think_time.unwrap_or_else(|| self.params.think_time.to_string());
                let threads = threads.unwrap_or_else(|| self.params.threads.to_string());
                let multipv = multipv.unwrap_or_else(|| self.params.multipv.to_string());
                self.params = EngineParams::from_inputs(&think_time, &threads, &multipv);
                self.schedule_eval();
                vec![self.state_message()]
            }
            ClientMessage::SetMetric { metric } => {
                self.viewer.metric = metric;
                vec![self.state_message()]
            }
            ClientMessage::Annotate => {
                self.start_annotation();
                vec![self.state_message()]
            }
            ClientMessage::PlayMove { from, to } => {
                if from.is_empty() || to.is_empty() || from == to {
                    return Vec::new();
                }
                let outcome = self.play.apply_user_move(&from, &to);
                if matches!(outcome, UserMoveOutcome::Played { .. }) {
                    self.maybe_engine_move();
                }
                vec![self.play_message(Some(outcome))]
            }
            ClientMessage::PlayReset => {
                if let Some(task) = self.play_task.take() {
                    task.abort();
                }
                self.play.reset();
                self.play_eval = format_engine_eval(self.play.position(), None, &[]);
                self.maybe_engine_move();
                vec![self.play_message(None)]
            }
            ClientMessage::SetEngineSide { side } => {
                self.engine_side = side;
                self.maybe_engine_move();
                vec![self.play_message(None)]
            }
            ClientMessage::SetSkill { level } => {
                self.skill_level = level.map(|l| l.min(20));
                vec![self.play_message(None)]
            }
            ClientMessage::AnalysePlay => {
                let pgn = self.play.to_pgn();
                let mut outgoing = self.load_pgn(&pgn).await;
                if self.viewer.set_ply(self.viewer.total_plies() as i64) {
                    self.schedule_eval();
                    outgoing = vec![self.state_message()];
                }
                outgoing
            }
        }
    }

    async fn load_pgn(&mut self, pgn: &str) -> Vec<ServerMessage> {
        self.eval_slot.stop().await;
        self.eval_slot.drain();
        self.annotation_slot.stop().await;
        self.annotation_slot.drain();
        self.last_analysis_key = None;
        self.eval_due = None;

        match self.viewer.load_pgn(pgn) {
            Ok(()) => {
                info!(plies = self.viewer.total_plies(), "Loaded PGN");
                self.schedule_eval();
                vec![self.state_message()]
            }
            Err(e) => {
                warn!(error = %e, "Failed to load PGN");
                vec![
                    self.state_message(),
                    ServerMessage::Error {
                        message: e.to_string(),
                    },
                ]
            }
        }
    }

    fn navigate(&mut self, apply: impl FnOnce(&mut ViewerState) -> bool) -> Vec<ServerMessage> {
        if !apply(&mut self.viewer) {
            return Vec::new();
        }
        self.viewer.invalidate_analysis();
        self.schedule_eval();
        vec![self.state_message()]
    }

    /// Restart the debounce window.
    fn schedule_eval(&mut self) {
        if self.viewer.analysis_ready {
            self.eval_due = Some(Instant::now() + EVAL_DEBOUNCE);
        }
    }

    fn analysis_key(&self, position: &Chess) -> AnalysisKey {
        AnalysisKey {
            fen: fen_of(position),
            multipv: self.params.multipv,
            think_time_bits: self.params.think_time.to_bits(),
            threads: self.params.threads,
        }
    }

    fn start_eval(&mut self) -> Vec<ServerMessage> {
        self.eval_due = None;
        let Some(target) = self.viewer.eval_target() else {
            return Vec::new();
        };

        let key = self.analysis_key(&target.position);
        if self.last_analysis_key.as_ref() == Some(&key) {
            debug!(fen = %key.fen, "Skipping repeated analysis request");
            if self.viewer.restore_analysis() {
                return vec![self.state_message()];
            }
            return Vec::new();
        }
        self.last_analysis_key = Some(key);

        self.viewer.begin_eval();
        let ticket = self.eval_slot.begin();
        debug!(generation = ticket.generation(), ply = self.viewer.ply, "Starting streaming analysis");

        let request = StreamRequest {
            position: target.position,
            previous: target.previous,
            time_limit: self.params.think_duration(),
            depth: None,
            multipv: self.params.multipv,
            threads: self.params.threads,
        };
        let task = tokio::spawn(stream_analysis_worker(
            self.engine.clone(),
            request,
            target.mover_is_white,
            ticket,
        ));
        self.eval_slot.attach(task);

        vec![self.state_message()]
    }

    fn drain_analysis(&mut self) -> Vec<ServerMessage> {
        let updates = self.eval_slot.drain();
        if self.viewer.apply_analysis(updates) {
            vec![self.state_message()]
        } else {
            Vec::new()
        }
    }

    fn start_annotation(&mut self) {
        if !self.viewer.begin_annotation() {
            return;
        }
        let Some(game) = self.viewer.game.as_ref() else {
            return;
        };

        let request = AnnotateRequest {
            start: game.start.clone(),
            moves: game.moves.clone(),
            time_limit: self.params.think_duration(),
            workers: self.params.threads as usize,
            metric: self.viewer.metric,
        };
        let ticket = self.annotation_slot.begin();
        info!(
            generation = ticket.generation(),
            plies = request.moves.len(),
            metric = %request.metric,
            "Starting annotation"
        );

        let engine = self.engine.clone();
        let task = tokio::spawn(async move {
            match ensure_stockfish_binary(&engine).await {
                Ok(path) => {
                    let launcher = StockfishLauncher::new(path, engine.hash_mb);
                    annotation_worker(launcher, request, ticket).await;
                }
                Err(e) => {
                    ticket.send(AnnotationUpdate::Failed(format!("Engine unavailable: {e}")));
                }
            }
        });
        self.annotation_slot.attach(task);
    }

    fn drain_annotation(&mut self) -> Vec<ServerMessage> {
        let update = self.annotation_slot.drain_latest();
        if self.viewer.apply_annotation(update) {
            vec![self.state_message()]
        } else {
            Vec::new()
        }
    }

    /// Ask the engine for a reply when it is its turn and no reply is pending.
    fn maybe_engine_move(&mut self) {
        if self.play.is_game_over() || !self.engine_side.to_move(self.play.position()) {
            return;
        }
        if self.play_task.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let position = self.play.position().clone();
        let fen = self.play.fen();
        let engine = self.engine.clone();
        let params = self.params;
        let skill_level = self.skill_level;
        let replies = self.replies.clone();

        self.play_task = Some(tokio::spawn(async move {
            let result = async {
                let path = ensure_stockfish_binary(&engine).await?;
                match skill_level {
                    Some(level) => {
                        engine_best_move(&path, engine.hash_mb, &position, level, params.think_duration())
                            .await
                    }
                    None => {
                        let best_move = best_move_uci(
                            &path,
                            engine.hash_mb,
                            &position,
                            params.think_duration(),
                            params.threads,
                            PLAY_MULTIPV,
                        )
                        .await?;
                        Ok(EngineMove {
                            best_move,
                            ..EngineMove::default()
                        })
                    }
                }
            }
            .await;
            let _ = replies.send(PlayReply {
                fen,
                position,
                result,
            });
        }));
    }

    fn apply_engine_reply(&mut self, reply: PlayReply) -> Vec<ServerMessage> {
        self.play_task = None;
        match reply.result {
            Ok(engine_move) => {
                let Some(uci) = engine_move.best_move.as_deref() else {
                    return Vec::new();
                };
                if self.play.apply_engine_move(&reply.fen, uci).is_none() {
                    return Vec::new();
                }
                if engine_move.score.is_some() {
                    self.play_eval =
                        format_engine_eval(&reply.position, engine_move.score, &engine_move.pv);
                }
                // The side may have changed while the engine was thinking
                self.maybe_engine_move();
                vec![self.play_message(None)]
            }
            Err(e) => {
                warn!(error = %e, "Engine move failed");
                vec![ServerMessage::Error {
                    message: format!("Engine unavailable: {e}"),
                }]
            }
        }
    }

    fn state_message(&self) -> ServerMessage {
        ServerMessage::State {
            viewer: Box::new(self.viewer.snapshot()),
            params: self.params,
        }
    }

    fn play_message(&self, outcome: Option<UserMoveOutcome>) -> ServerMessage {
        ServerMessage::Play(PlaySnapshot {
            fen: self.play.fen(),
            last_move: self.play.moves().last().map(uci_of),
            sans: self.play.sans().to_vec(),
            move_rows: move_rows(self.play.start(), self.play.sans()),
            pgn: self.play.to_pgn(),
            engine_side: self.engine_side,
            skill_level: self.skill_level,
            thinking: self.play_task.as_ref().is_some_and(|task| !task.is_finished()),
            game_over: self.play.is_game_over(),
            eval: self.play_eval.clone(),
            outcome,
        })
    }

    async fn shutdown(&mut self) {
        self.eval_due = None;
        if let Some(task) = self.play_task.take() {
            task.abort();
        }
        self.eval_slot.stop().await;
        self.annotation_slot.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"navigate","to":"back2"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Navigate { to: NavTarget::Back2 }));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"set_params","threads":"4"}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::SetParams { think_time: None, threads: Some(ref t), multipv: None } if t == "4"
        ));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"set_engine_side","side":"white"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::SetEngineSide { side: EngineSide::White }));

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"resign"}"#).is_err());
    }

    #[tokio::test]
    async fn test_navigation_schedules_eval() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut session = Session::new(EngineConfig::default(), tx);

        // Nothing loaded: navigation is a no-op
        assert!(session.handle_text(r#"{"type":"navigate","to":"next"}"#).await.is_empty());
        assert!(session.eval_due.is_none());

        let out = session
            .handle_text(r#"{"type":"load_pgn","pgn":"1. e4 e5 2. Nf3 *"}"#)
            .await;
        assert_eq!(out.len(), 1);
        assert!(session.eval_due.is_some());

        let out = session.handle_text(r#"{"type":"navigate","to":"last"}"#).await;
        assert_eq!(out.len(), 1);
        assert_eq!(session.viewer.ply, 3);

        let out = session.handle_text(r#"{"type":"navigate","to":"forward2"}"#).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_returning_to_analysed_ply_restores_best_move() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut session = Session::new(EngineConfig::default(), tx);
        session
            .handle_text(r#"{"type":"load_pgn","pgn":"1. e4 e5 2. Nf3 *"}"#)
            .await;
        session.handle_text(r#"{"type":"set_ply","ply":1}"#).await;

        // Finished analysis of ply 1
        let position = session.viewer.current_board();
        session.last_analysis_key = Some(session.analysis_key(&position));
        session.viewer.begin_eval();
        session.viewer.engine_move = Some("e7e5".into());
        session.viewer.analysis_done = true;

        session.handle_text(r#"{"type":"navigate","to":"next"}"#).await;
        assert!(session.viewer.arrows().is_empty());
        session.handle_text(r#"{"type":"navigate","to":"prev"}"#).await;
        assert!(session.eval_due.is_some());

        // Debounce fires on the same position: no new search, best move back
        let out = session.start_eval();
        assert_eq!(out.len(), 1);
        assert!(session.eval_due.is_none());
        assert_eq!(session.viewer.engine_move.as_deref(), Some("e7e5"));
        assert!(session.viewer.analysis_done);
        assert!(!session.viewer.arrows().is_empty());
    }

    #[tokio::test]
    async fn test_bad_pgn_reports_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut session = Session::new(EngineConfig::default(), tx);

        let out = session.handle_text(r#"{"type":"load_pgn","pgn":"1. e4 Ke7 *"}"#).await;
        assert!(matches!(out.last(), Some(ServerMessage::Error { .. })));
        assert!(!session.viewer.analysis_ready);
        assert!(session.eval_due.is_none());

        let out = session.handle_text("not json").await;
        assert!(matches!(out.as_slice(), [ServerMessage::Error { message }] if message.starts_with("Invalid message")));
    }

    #[tokio::test]
    async fn test_stale_engine_reply_is_ignored() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut session = Session::new(EngineConfig::default(), tx);
        session.engine_side = EngineSide::None;

        let start = Chess::default();
        let stale_fen = fen_of(&start);
        session.play.apply_user_move("e2", "e4");

        let out = session.apply_engine_reply(PlayReply {
            fen: stale_fen,
            position: start,
            result: Ok(EngineMove {
                best_move: Some("d2d4".into()),
                ..EngineMove::default()
            }),
        });
        assert!(out.is_empty());
        assert_eq!(session.play.sans(), ["e4"]);
    }

    #[tokio::test]
    async fn test_engine_reply_is_applied() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut session = Session::new(EngineConfig::default(), tx);
        session.engine_side = EngineSide::None;
        session.play.apply_user_move("e2", "e4");
        let position = session.play.position().clone();

        let out = session.apply_engine_reply(PlayReply {
            fen: session.play.fen(),
            position,
            result: Ok(EngineMove {
                best_move: Some("e7e5".into()),
                ..EngineMove::default()
            }),
        });
        assert_eq!(out.len(), 1);
        assert_eq!(session.play.sans(), ["e4", "e5"]);
        assert_eq!(session.play_eval, "Eval: --");
    }
}
