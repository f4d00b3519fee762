/// Core errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid routing meta: {0}")]
    InvalidMeta(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("schema compilation failed: {0}")]
    Schema(String),
}
