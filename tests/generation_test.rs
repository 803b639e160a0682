//! Superseded requests never reach displayed state.

mod common;

use std::time::Duration;

use analysis_worker::analysis::Metric;
use analysis_worker::annotate::{annotation_worker, AnnotateRequest, AnnotationUpdate};
use analysis_worker::session::GenerationSlot;
use analysis_worker::stream::{AnalysisProgress, AnalysisUpdate};
use chess_core::pgn::parse_pgn;
use common::ScriptedLauncher;
use server::viewer::{EvalStatus, ViewerState};

fn request(pgn: &str) -> AnnotateRequest {
    let game = parse_pgn(pgn).unwrap();
    AnnotateRequest {
        start: game.start,
        moves: game.moves,
        time_limit: Duration::from_millis(10),
        workers: 1,
        metric: Metric::Cpl,
    }
}

async fn wait_for<T>(slot: &mut GenerationSlot<T>) -> Vec<T> {
    for _ in 0..200 {
        let drained = slot.drain();
        if !drained.is_empty() {
            return drained;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Vec::new()
}

#[tokio::test]
async fn test_superseded_annotation_is_dropped() {
    let mut slot: GenerationSlot<AnnotationUpdate> = GenerationSlot::new();

    // Long game on a slow engine
    let slow = ScriptedLauncher::new(&[0, -400, -400, -800]).with_delay(Duration::from_millis(50));
    let first = slot.begin();
    let stale = first.clone();
    slot.attach(tokio::spawn(annotation_worker(
        slow.clone(),
        request("1. e4 e5 2. Nf3 Nc6 3. Bb5 a6 4. Ba4 Nf6 *"),
        first,
    )));

    tokio::time::sleep(Duration::from_millis(20)).await;
    let fast = ScriptedLauncher::new(&[0, 10, 0]);
    let second = slot.begin();
    assert!(stale.is_cancelled());
    slot.attach(tokio::spawn(annotation_worker(fast, request("1. d4 d5 *"), second)));

    // A late message from the first worker is filtered out
    assert!(stale.send(AnnotationUpdate::Failed("stale".into())));

    let updates = wait_for(&mut slot).await;
    assert_eq!(updates.len(), 1);
    match &updates[0] {
        AnnotationUpdate::Completed(result) => assert_eq!(result.evals, vec![0, 10, 0]),
        other => panic!("unexpected update: {other:?}"),
    }

    slot.stop().await;
    assert!(slow.evaluations() < 9);
}

#[tokio::test]
async fn test_stale_analysis_never_changes_viewer() {
    let mut slot: GenerationSlot<AnalysisUpdate> = GenerationSlot::new();
    let mut viewer = ViewerState::default();
    viewer.load_pgn("1. e4 e5 *").unwrap();
    viewer.set_ply(1);

    let old = slot.begin();
    viewer.begin_eval();
    let new = slot.begin();

    old.send(AnalysisUpdate::Progress(AnalysisProgress {
        cpl: Some(500),
        lines: vec!["-5.00 — 1... e5".into()],
        done: true,
        ..AnalysisProgress::default()
    }));
    assert!(!viewer.apply_analysis(slot.drain()));
    assert_eq!(viewer.eval, EvalStatus::Pending);
    assert!(!viewer.analysis_done);

    new.send(AnalysisUpdate::Progress(AnalysisProgress {
        cpl: Some(5),
        lines: vec!["+0.30 — 1... e5".into()],
        ..AnalysisProgress::default()
    }));
    old.send(AnalysisUpdate::Unavailable("Engine unavailable: stale".into()));
    assert!(viewer.apply_analysis(slot.drain()));
    assert_eq!(viewer.eval, EvalStatus::Cpl(5));
    assert_eq!(viewer.pv, vec!["+0.30 — 1... e5"]);
    assert!(!viewer.analysis_done);
}
