//! Replays a game move by move and produces the position list the engine
//! evaluates.

use std::fmt;
use std::str::FromStr;

use chess::{Board, ChessMove, File, MoveGen, Piece, Rank, Square};
use serde::{Deserialize, Serialize};

use crate::error::RulesError;
use crate::pgn::parse_pgn;

pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::White => "white",
            Side::Black => "black",
        }
    }

    /// Side that plays ply `ply` (0-indexed) of a game started by `self`.
    pub fn at_ply(self, ply: usize) -> Side {
        if ply % 2 == 0 {
            self
        } else {
            self.opponent()
        }
    }

    pub fn opponent(self) -> Side {
        match self {
            Side::White => Side::Black,
            Side::Black => Side::White,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "white" | "w" => Ok(Side::White),
            "black" | "b" => Ok(Side::Black),
            other => Err(format!("unknown side '{other}'")),
        }
    }
}

/// Side to move according to the second FEN field. Anything other than
/// `b` (including a truncated FEN) is White.
pub fn side_to_move(fen: &str) -> Side {
    match fen.split_whitespace().nth(1) {
        Some("b") => Side::Black,
        _ => Side::White,
    }
}

/// Whether `fen` is the standard initial position. Move counters are ignored.
pub fn is_standard_start(fen: &str) -> bool {
    fen.split_whitespace()
        .take(4)
        .eq(START_FEN.split_whitespace().take(4))
}

/// The positions and moves of one game.
///
/// `positions[i]` is the position before `moves_uci[i]`, and
/// `positions.len() == moves_uci.len() + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameLine {
    pub positions: Vec<String>,
    pub moves_uci: Vec<String>,
    pub moves_san: Vec<String>,
}

impl GameLine {
    pub fn len(&self) -> usize {
        self.moves_uci.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves_uci.is_empty()
    }

    /// Side that made the first move.
    pub fn first_mover(&self) -> Side {
        self.positions
            .first()
            .map(|fen| side_to_move(fen))
            .unwrap_or(Side::White)
    }
}

/// Parse a PGN and replay its moves.
pub fn replay_pgn(pgn: &str) -> Result<GameLine, RulesError> {
    let game = parse_pgn(pgn)?;
    replay(game.metadata.start_fen.as_deref(), &game.moves)
}

/// Replay SAN moves from `start_fen` (standard start position when `None`).
pub fn replay(start_fen: Option<&str>, sans: &[String]) -> Result<GameLine, RulesError> {
    if sans.is_empty() {
        return Err(RulesError::EmptyGame);
    }

    let start_fen = start_fen.unwrap_or(START_FEN);
    let mut board = board_from_fen(start_fen)?;
    let mut clock = Clock::from_fen(start_fen);

    let mut positions = Vec::with_capacity(sans.len() + 1);
    let mut moves_uci = Vec::with_capacity(sans.len());
    positions.push(clock.stamp(&board));

    for (ply, san) in sans.iter().enumerate() {
        let mv = find_san_move(&board, san).map_err(|e| match e {
            RulesError::IllegalMove { mv, .. } => RulesError::IllegalMove { mv, ply },
            other => other,
        })?;
        clock.advance(&board, mv);
        board = board.make_move_new(mv);
        moves_uci.push(move_to_uci(mv));
        positions.push(clock.stamp(&board));
    }

    Ok(GameLine {
        positions,
        moves_uci,
        moves_san: sans.to_vec(),
    })
}

/// Apply one UCI move to a FEN and return the resulting FEN.
pub fn apply_uci(fen: &str, uci: &str) -> Result<String, RulesError> {
    let board = board_from_fen(fen)?;
    let mv = parse_uci_move(uci).ok_or_else(|| RulesError::InvalidUci(uci.to_string()))?;
    if !board.legal(mv) {
        return Err(RulesError::IllegalMove {
            mv: uci.to_string(),
            ply: 0,
        });
    }

    let mut clock = Clock::from_fen(fen);
    clock.advance(&board, mv);
    Ok(clock.stamp(&board.make_move_new(mv)))
}

/// Format a move in UCI notation (`e2e4`, `e7e8q`).
pub fn move_to_uci(mv: ChessMove) -> String {
    let promotion = match mv.get_promotion() {
        Some(Piece::Queen) => "q",
        Some(Piece::Rook) => "r",
        Some(Piece::Bishop) => "b",
        Some(Piece::Knight) => "n",
        _ => "",
    };
    format!("{}{}{}", mv.get_source(), mv.get_dest(), promotion)
}

fn board_from_fen(fen: &str) -> Result<Board, RulesError> {
    Board::from_str(fen).map_err(|e| RulesError::InvalidFen {
        fen: fen.to_string(),
        reason: e.to_string(),
    })
}

fn parse_square(file: u8, rank: u8) -> Option<Square> {
    if !(b'a'..=b'h').contains(&file) || !(b'1'..=b'8').contains(&rank) {
        return None;
    }
    Some(Square::make_square(
        Rank::from_index((rank - b'1') as usize),
        File::from_index((file - b'a') as usize),
    ))
}

fn parse_uci_move(uci: &str) -> Option<ChessMove> {
    let bytes = uci.as_bytes();
    if bytes.len() < 4 || bytes.len() > 5 {
        return None;
    }

    let from = parse_square(bytes[0], bytes[1])?;
    let to = parse_square(bytes[2], bytes[3])?;
    let promotion = match bytes.get(4) {
        None => None,
        Some(b'q' | b'Q') => Some(Piece::Queen),
        Some(b'r' | b'R') => Some(Piece::Rook),
        Some(b'b' | b'B') => Some(Piece::Bishop),
        Some(b'n' | b'N') => Some(Piece::Knight),
        Some(_) => return None,
    };

    Some(ChessMove::new(from, to, promotion))
}

fn find_san_move(board: &Board, san: &str) -> Result<ChessMove, RulesError> {
    let clean = san.trim_end_matches(|c: char| matches!(c, '+' | '#' | '!' | '?'));
    let legal_moves: Vec<ChessMove> = MoveGen::new_legal(board).collect();
    let illegal = || RulesError::IllegalMove {
        mv: san.to_string(),
        ply: 0,
    };

    if matches!(clean, "O-O" | "0-0" | "O-O-O" | "0-0-0") {
        let kingside = clean.len() == 3;
        return legal_moves
            .into_iter()
            .find(|m| {
                let src = m.get_source().get_file().to_index();
                let dst = m.get_dest().get_file().to_index();
                board.piece_on(m.get_source()) == Some(Piece::King)
                    && if kingside { dst == src + 2 } else { src == dst + 2 }
            })
            .ok_or_else(illegal);
    }

    let bytes = clean.as_bytes();
    let (piece, rest) = match bytes.first() {
        None => return Err(RulesError::InvalidSan(san.to_string())),
        Some(b'K') => (Piece::King, &clean[1..]),
        Some(b'Q') => (Piece::Queen, &clean[1..]),
        Some(b'R') => (Piece::Rook, &clean[1..]),
        Some(b'B') => (Piece::Bishop, &clean[1..]),
        Some(b'N') => (Piece::Knight, &clean[1..]),
        Some(b) if b.is_ascii_uppercase() => return Err(RulesError::InvalidSan(san.to_string())),
        Some(_) => (Piece::Pawn, clean),
    };

    let (rest, promotion) = match rest.find('=') {
        Some(eq) => {
            let promo = match rest.as_bytes().get(eq + 1) {
                Some(b'Q') => Piece::Queen,
                Some(b'R') => Piece::Rook,
                Some(b'B') => Piece::Bishop,
                Some(b'N') => Piece::Knight,
                _ => return Err(RulesError::InvalidSan(san.to_string())),
            };
            (&rest[..eq], Some(promo))
        }
        None => (rest, None),
    };

    let rest = rest.replace('x', "");
    let rest_bytes = rest.as_bytes();
    if rest_bytes.len() < 2 {
        return Err(RulesError::InvalidSan(san.to_string()));
    }
    let n = rest_bytes.len();
    let dest = parse_square(rest_bytes[n - 2], rest_bytes[n - 1])
        .ok_or_else(|| RulesError::InvalidSan(san.to_string()))?;
    let disambig = &rest_bytes[..n - 2];

    let candidates: Vec<ChessMove> = legal_moves
        .into_iter()
        .filter(|m| {
            m.get_dest() == dest
                && board.piece_on(m.get_source()) == Some(piece)
                && m.get_promotion() == promotion
        })
        .filter(|m| {
            let src = m.get_source();
            disambig.iter().all(|&b| match b {
                b'a'..=b'h' => src.get_file().to_index() == (b - b'a') as usize,
                b'1'..=b'8' => src.get_rank().to_index() == (b - b'1') as usize,
                _ => true,
            })
        })
        .collect();

    match candidates.as_slice() {
        [only] => Ok(*only),
        [] => Err(illegal()),
        many => Err(RulesError::AmbiguousSan {
            san: san.to_string(),
            candidates: many.len(),
        }),
    }
}

/// Halfmove clock and fullmove number, which `chess::Board` does not track.
#[derive(Debug, Clone, Copy)]
struct Clock {
    halfmove: u32,
    fullmove: u32,
}

impl Clock {
    fn from_fen(fen: &str) -> Self {
        let mut fields = fen.split_whitespace().skip(4);
        let halfmove = fields.next().and_then(|v| v.parse().ok()).unwrap_or(0);
        let fullmove = fields
            .next()
            .and_then(|v| v.parse().ok())
            .filter(|&n| n > 0)
            .unwrap_or(1);
        Self { halfmove, fullmove }
    }

    fn advance(&mut self, board: &Board, mv: ChessMove) {
        let is_pawn = board.piece_on(mv.get_source()) == Some(Piece::Pawn);
        let is_capture = board.piece_on(mv.get_dest()).is_some();
        self.halfmove = if is_pawn || is_capture { 0 } else { self.halfmove + 1 };
        if board.side_to_move() == chess::Color::Black {
            self.fullmove += 1;
        }
    }

    /// FEN of `board` with this clock's counters.
    fn stamp(&self, board: &Board) -> String {
        let fen = board.to_string();
        let head: Vec<&str> = fen.split_whitespace().take(4).collect();
        format!("{} {} {}", head.join(" "), self.halfmove, self.fullmove)
    }
}
