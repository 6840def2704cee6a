// src/core/mtree/error.rs

#[derive(Debug, thiserror::Error)]
pub enum MTreeError {
    #[error("minimum node capacity must be at least 2, got {0}")]
    MinCapacityTooSmall(usize),

    #[error("maximum node capacity must exceed the minimum: min {min}, max {max}")]
    MaxCapacityTooSmall { min: usize, max: usize },
}

// Result type alias for convenience
pub type MTreeResult<T> = Result<T, MTreeError>;
