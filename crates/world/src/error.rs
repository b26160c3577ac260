use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorldError {
    #[error("tile ({x}, {y}) is outside the {width}x{height} maze")]
    OutOfBounds {
        x: usize,
        y: usize,
        width: usize,
        height: usize,
    },

    #[error("malformed maze sheet: {0}")]
    MalformedSheet(String),

    #[error("failed to read maze sheet")]
    Io(#[from] std::io::Error),

    #[error("failed to parse maze sheet")]
    Parse(#[from] serde_json::Error),
}
