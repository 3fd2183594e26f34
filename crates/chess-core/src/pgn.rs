//! PGN parsing utilities. A lightweight regex-based parser.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::RulesError;
use crate::game_data::{GameMetadata, ParsedGame};

static HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\[(\w+)\s+"([^"]*)"\]"#).expect("header regex"));
static HEADER_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]").expect("header block regex"));
static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^}]*\}|;[^\n]*").expect("comment regex"));
static VARIATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^()]*\)").expect("variation regex"));
static MOVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[KQRBN]?[a-h]?[1-8]?x?[a-h][1-8](?:=[QRBN])?[+#]?|O-O-O|O-O|0-0-0|0-0")
        .expect("move regex")
});

/// Parse a PGN string into headers and its SAN move list.
pub fn parse_pgn(pgn: &str) -> Result<ParsedGame, RulesError> {
    let mut metadata = GameMetadata::default();
    let mut setup = None;
    let mut fen = None;

    for cap in HEADER_RE.captures_iter(pgn) {
        let key = &cap[1];
        let value = cap[2].to_string();
        match key {
            "ECO" if !value.is_empty() && value != "?" => metadata.eco = Some(value),
            "Opening" if !value.is_empty() && value != "?" => metadata.opening = Some(value),
            "SetUp" => setup = Some(value),
            "FEN" => fen = Some(value),
            _ => {}
        }
    }

    if setup.as_deref() == Some("1") || (setup.is_none() && fen.is_some()) {
        metadata.start_fen = fen;
    }

    let moves = extract_moves(pgn);
    if moves.is_empty() {
        return Err(RulesError::EmptyGame);
    }

    Ok(ParsedGame { metadata, moves })
}

/// Extract SAN moves from PGN text (after removing headers, comments, variations).
fn extract_moves(pgn: &str) -> Vec<String> {
    let no_headers = HEADER_BLOCK_RE.replace_all(pgn, "");
    let no_comments = COMMENT_RE.replace_all(&no_headers, "");

    // Nested variations are removed innermost-first.
    let mut text = no_comments.into_owned();
    loop {
        let stripped = VARIATION_RE.replace_all(&text, "").into_owned();
        if stripped == text {
            break;
        }
        text = stripped;
    }

    MOVE_RE
        .find_iter(&text)
        .map(|m| m.as_str().replace('0', "O"))
        .collect()
}
