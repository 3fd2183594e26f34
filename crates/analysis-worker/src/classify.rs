//! Move classification. Pure functions only
//! (no board, engine or repository dependencies).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Classification thresholds (centipawn loss, strictly greater than)
pub const DEFAULT_BLUNDER_CP: f64 = 200.0;
pub const DEFAULT_MISTAKE_CP: f64 = 100.0;
pub const DEFAULT_INACCURACY_CP: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Blunder,
    Mistake,
    Inaccuracy,
    Good,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Classification::Blunder => "blunder",
            Classification::Mistake => "mistake",
            Classification::Inaccuracy => "inaccuracy",
            Classification::Good => "good",
        }
    }

    pub fn is_serious(self) -> bool {
        matches!(self, Classification::Blunder | Classification::Mistake)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Classification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blunder" => Ok(Classification::Blunder),
            "mistake" => Ok(Classification::Mistake),
            "inaccuracy" => Ok(Classification::Inaccuracy),
            "good" => Ok(Classification::Good),
            other => Err(format!("unknown classification '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub blunder: f64,
    pub mistake: f64,
    pub inaccuracy: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            blunder: DEFAULT_BLUNDER_CP,
            mistake: DEFAULT_MISTAKE_CP,
            inaccuracy: DEFAULT_INACCURACY_CP,
        }
    }
}

/// Centipawns lost by the side that moved. Evaluations are from White's
/// point of view, so a drop hurts White and a rise hurts Black.
pub fn cp_loss(eval_before: f64, eval_after: f64, is_white_move: bool) -> f64 {
    let diff = eval_after - eval_before;
    if is_white_move {
        -diff
    } else {
        diff
    }
}

pub fn classify(
    eval_before: f64,
    eval_after: f64,
    is_white_move: bool,
    move_played: &str,
    best_move: &str,
    thresholds: &Thresholds,
) -> Classification {
    // Playing the engine's move is never a mistake, however bad the position already is.
    if !move_played.is_empty() && move_played == best_move {
        return Classification::Good;
    }

    let loss = cp_loss(eval_before, eval_after, is_white_move);
    if loss > thresholds.blunder {
        Classification::Blunder
    } else if loss > thresholds.mistake {
        Classification::Mistake
    } else if loss > thresholds.inaccuracy {
        Classification::Inaccuracy
    } else {
        Classification::Good
    }
}
