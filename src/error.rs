use serde::ser::Serializer;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChartError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("json decode error: {0}")]
    SimdJson(#[from] simd_json::Error),
    #[error("unknown indicator id: {0}")]
    UnknownIndicator(u64),
    #[error("subscription channel closed")]
    ChannelClosed,
}

impl serde::Serialize for ChartError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
