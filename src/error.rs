use thiserror::Error;

/// Errors surfaced by model construction and forward evaluation.
///
/// All of these are fatal for the call that produced them; nothing is
/// retried or recovered internally.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Invalid hyperparameters, rejected at construction time.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A token id falls outside the embedding table.
    #[error("token id {id} out of range for vocabulary of size {vocab_size}")]
    OutOfRange { id: i64, vocab_size: usize },

    /// Caller passed a tensor with the wrong rank, dtype or dimensions.
    #[error("shape mismatch: expected {expected}, got {got}")]
    Shape { expected: String, got: String },

    /// Input too short for the convolutional poolings to leave any time step.
    #[error("input of {time} time steps is shorter than the {min_time} required by the convolutional encoder")]
    DegenerateInput { time: usize, min_time: usize },

    #[error(transparent)]
    Tensor(#[from] candle_core::Error),
}
