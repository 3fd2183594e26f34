use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RulesError {
    #[error("Invalid FEN '{fen}': {reason}")]
    InvalidFen { fen: String, reason: String },

    #[error("Invalid SAN '{0}'")]
    InvalidSan(String),

    #[error("Illegal move '{mv}' at ply {ply}")]
    IllegalMove { mv: String, ply: usize },

    #[error("Ambiguous SAN '{san}' ({candidates} candidates)")]
    AmbiguousSan { san: String, candidates: usize },

    #[error("Invalid UCI move '{0}'")]
    InvalidUci(String),

    #[error("Game has no moves")]
    EmptyGame,
}
