use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameMetadata {
    /// `ECO` header, when present and not `?`.
    pub eco: Option<String>,
    /// `Opening` header, when present and not `?`.
    pub opening: Option<String>,
    /// Custom start position (`[SetUp "1"]` + `[FEN "..."]`).
    pub start_fen: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedGame {
    pub metadata: GameMetadata,
    pub moves: Vec<String>, // SAN notation
}
