//! Built-in opening table.
//!
//! Openings are keyed by their UCI move sequence from the standard start
//! position; a game is named after the longest entry its moves start with.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Opening {
    pub eco: &'static str,
    pub name: &'static str,
    pub moves: &'static str,
}

const fn op(eco: &'static str, name: &'static str, moves: &'static str) -> Opening {
    Opening { eco, name, moves }
}

static OPENINGS: &[Opening] = &[
    // Flank openings
    op("A00", "Polish Opening", "b2b4"),
    op("A01", "Nimzo-Larsen Attack", "b2b3"),
    op("A04", "Reti Opening", "g1f3"),
    op("A10", "English Opening", "c2c4"),
    op("A20", "English Opening: King's English Variation", "c2c4 e7e5"),
    op("A40", "Queen's Pawn Game", "d2d4"),
    op("A45", "Indian Defense", "d2d4 g8f6"),
    op("A56", "Benoni Defense", "d2d4 g8f6 c2c4 c7c5"),
    op("A80", "Dutch Defense", "d2d4 f7f5"),
    // Semi-open games
    op("B00", "King's Pawn Opening", "e2e4"),
    op("B01", "Scandinavian Defense", "e2e4 d7d5"),
    op("B02", "Alekhine Defense", "e2e4 g8f6"),
    op("B06", "Modern Defense", "e2e4 g7g6"),
    op("B07", "Pirc Defense", "e2e4 d7d6 d2d4 g8f6"),
    op("B10", "Caro-Kann Defense", "e2e4 c7c6"),
    op("B20", "Sicilian Defense", "e2e4 c7c5"),
    op("B22", "Sicilian Defense: Alapin Variation", "e2e4 c7c5 c2c3"),
    op("B23", "Sicilian Defense: Closed", "e2e4 c7c5 b1c3"),
    op("B27", "Sicilian Defense", "e2e4 c7c5 g1f3"),
    op("B30", "Sicilian Defense: Old Sicilian", "e2e4 c7c5 g1f3 b8c6"),
    op("B40", "Sicilian Defense: French Variation", "e2e4 c7c5 g1f3 e7e6"),
    op("B50", "Sicilian Defense", "e2e4 c7c5 g1f3 d7d6"),
    op(
        "B90",
        "Sicilian Defense: Najdorf Variation",
        "e2e4 c7c5 g1f3 d7d6 d2d4 c5d4 f3d4 g8f6 b1c3 a7a6",
    ),
    op("C00", "French Defense", "e2e4 e7e6"),
    // Open games
    op("C20", "King's Pawn Game", "e2e4 e7e5"),
    op("C23", "Bishop's Opening", "e2e4 e7e5 f1c4"),
    op("C25", "Vienna Game", "e2e4 e7e5 b1c3"),
    op("C30", "King's Gambit", "e2e4 e7e5 f2f4"),
    op("C40", "King's Knight Opening", "e2e4 e7e5 g1f3"),
    op("C41", "Philidor Defense", "e2e4 e7e5 g1f3 d7d6"),
    op("C42", "Petrov's Defense", "e2e4 e7e5 g1f3 g8f6"),
    op("C44", "King's Pawn Game: Knight Defense", "e2e4 e7e5 g1f3 b8c6"),
    op("C45", "Scotch Game", "e2e4 e7e5 g1f3 b8c6 d2d4"),
    op("C50", "Italian Game", "e2e4 e7e5 g1f3 b8c6 f1c4"),
    op("C50", "Italian Game: Giuoco Piano", "e2e4 e7e5 g1f3 b8c6 f1c4 f8c5"),
    op("C55", "Italian Game: Two Knights Defense", "e2e4 e7e5 g1f3 b8c6 f1c4 g8f6"),
    op("C60", "Ruy Lopez", "e2e4 e7e5 g1f3 b8c6 f1b5"),
    op("C65", "Ruy Lopez: Berlin Defense", "e2e4 e7e5 g1f3 b8c6 f1b5 g8f6"),
    op("C68", "Ruy Lopez: Exchange Variation", "e2e4 e7e5 g1f3 b8c6 f1b5 a7a6 b5c6"),
    op("C70", "Ruy Lopez: Morphy Defense", "e2e4 e7e5 g1f3 b8c6 f1b5 a7a6"),
    // Closed games
    op("D00", "Queen's Pawn Game", "d2d4 d7d5"),
    op("D00", "Queen's Pawn Game: London System", "d2d4 d7d5 c1f4"),
    op("D06", "Queen's Gambit", "d2d4 d7d5 c2c4"),
    op("D10", "Slav Defense", "d2d4 d7d5 c2c4 c7c6"),
    op("D20", "Queen's Gambit Accepted", "d2d4 d7d5 c2c4 d5c4"),
    op("D30", "Queen's Gambit Declined", "d2d4 d7d5 c2c4 e7e6"),
    // Indian defenses
    op("D80", "Grunfeld Defense", "d2d4 g8f6 c2c4 g7g6 b1c3 d7d5"),
    op("E12", "Queen's Indian Defense", "d2d4 g8f6 c2c4 e7e6 g1f3 b7b6"),
    op("E20", "Nimzo-Indian Defense", "d2d4 g8f6 c2c4 e7e6 b1c3 f8b4"),
    op("E60", "King's Indian Defense", "d2d4 g8f6 c2c4 g7g6"),
];

/// Name the opening a game's UCI moves belong to (longest matching prefix).
pub fn lookup_opening<S: AsRef<str>>(moves_uci: &[S]) -> Option<&'static Opening> {
    OPENINGS
        .iter()
        .filter(|opening| {
            let book: Vec<&str> = opening.moves.split_whitespace().collect();
            book.len() <= moves_uci.len()
                && book.iter().zip(moves_uci).all(|(expected, played)| {
                    let played: &str = played.as_ref();
                    *expected == played
                })
        })
        .max_by_key(|opening| opening.moves.split_whitespace().count())
}
