use thiserror::Error;

use crate::llm::ModelError;

/// Why a turn ended without a final answer.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Agent error: {0}")]
    Model(#[from] ModelError),

    /// The model kept requesting tools past the configured limit.
    #[error("tool round limit ({rounds}) reached without a final answer")]
    RoundLimit { rounds: u32, partial: String },
}

pub type Result<T> = std::result::Result<T, TurnError>;
