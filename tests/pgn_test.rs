//! PGN parsing across crates: replaying a parsed game reproduces its SAN.

use analysis_worker::play::PlayBoard;
use chess_core::game_data::{board_from_moves, move_rows};
use chess_core::notation::{fen_of, play_san, uci_of};
use chess_core::pgn::{export_pgn, parse_pgn};
use shakmaty::Position;

const GAMES: &[&str] = &[
    "[Event \"Casual\"]\n[White \"A\"]\n[Black \"B\"]\n\n1. e4 e5 2. Nf3 Nc6 3. Bb5 a6 4. Ba4 Nf6 5. O-O Be7 *",
    "1. e4 e5 2. Qh5 Nc6 3. Bc4 Nf6 4. Qxf7# 1-0",
    "1. d4 {main} d5 (1... Nf6 2. c4) 2. c4 dxc4 3. e3 b5 4. a4 c6 5. axb5 cxb5 6. Qf3 *",
    "[FEN \"8/P6k/8/8/8/8/6pK/8 w - - 0 1\"]\n[SetUp \"1\"]\n\n1. a8=Q g1=Q+ 2. Kxg1 *",
    "[FEN \"r3k2r/8/8/8/8/8/8/R3K2R b KQkq - 0 10\"]\n\n10... O-O-O 11. O-O Rd1 12. Rfxd1 *",
];

#[test]
fn test_replay_reproduces_sans() {
    for pgn in GAMES {
        let game = parse_pgn(pgn).unwrap();
        assert_eq!(game.moves.len(), game.sans.len(), "{pgn}");

        let mut pos = game.start.clone();
        let replayed: Vec<String> = game.moves.iter().map(|mv| play_san(&mut pos, mv)).collect();
        assert_eq!(replayed, game.sans, "{pgn}");
        assert_eq!(fen_of(&pos), fen_of(&game.board_at_ply(game.moves.len())));
    }
}

#[test]
fn test_export_then_parse_round_trips() {
    for pgn in GAMES {
        let game = parse_pgn(pgn).unwrap();
        let mut text = String::new();
        if let Some(fen) = game.header("FEN") {
            text.push_str(&format!("[FEN \"{fen}\"]\n[SetUp \"1\"]\n\n"));
        }
        text.push_str(&export_pgn(&game.start, &game.moves));

        let again = parse_pgn(&text).unwrap();
        assert_eq!(again.sans, game.sans, "{text}");
    }
}

#[test]
fn test_variations_and_comments_are_skipped() {
    let game = parse_pgn(GAMES[2]).unwrap();
    assert_eq!(game.sans[..4], ["d4", "d5", "c4", "dxc4"]);
    assert_eq!(game.sans.len(), 11);
}

#[test]
fn test_board_helpers_agree() {
    let game = parse_pgn(GAMES[0]).unwrap();
    for ply in 0..=game.moves.len() {
        assert_eq!(
            fen_of(&board_from_moves(&game.moves, Some(ply))),
            fen_of(&game.board_at_ply(ply))
        );
    }
    let rows = move_rows(&game.start, &game.sans);
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[4].white, "O-O");
}

#[test]
fn test_played_game_loads_back() {
    let mut board = PlayBoard::new();
    for (from, to) in [("e2", "e4"), ("e7", "e5"), ("g1", "f3"), ("b8", "c6")] {
        board.apply_user_move(from, to);
    }
    let game = parse_pgn(&board.to_pgn()).unwrap();
    assert_eq!(game.sans, board.sans());
    let ucis: Vec<String> = game.moves.iter().map(uci_of).collect();
    assert_eq!(ucis, ["e2e4", "e7e5", "g1f3", "b8c6"]);
    assert!(!game.board_at_ply(4).is_game_over());
}
