//! Chess rules used by the analysis pipeline.
//!
//! Turns a PGN into the ordered list of positions (FEN) and played moves
//! (UCI), applies single UCI moves to a position, and names the opening a
//! move sequence belongs to.

pub mod error;
pub mod game_data;
pub mod openings;
pub mod pgn;
pub mod replay;

pub use error::RulesError;
pub use game_data::{GameMetadata, ParsedGame};
pub use openings::{lookup_opening, Opening};
pub use pgn::parse_pgn;
pub use replay::{
    apply_uci, is_standard_start, replay, replay_pgn, side_to_move, GameLine, Side, START_FEN,
};
