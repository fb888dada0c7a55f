use std::path::PathBuf;

/// Errors surfaced by the playback engine.
///
/// Transport calls (`play`/`pause`/`stop`) never produce these; they are
/// silent no-ops without a loaded track.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("unsupported format: {extension:?}")]
    UnsupportedFormat { extension: String },

    #[error("open {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("decode: {0}")]
    Decode(String),

    #[error("no active stream")]
    NoActiveStream,

    #[error("length unknown")]
    LengthUnknown,

    #[error("resampler: {0}")]
    Resample(String),

    #[error("output device: {0}")]
    Device(String),
}

impl From<symphonia::core::errors::Error> for PlayerError {
    fn from(err: symphonia::core::errors::Error) -> Self {
        PlayerError::Decode(err.to_string())
    }
}

pub type Result<T, E = PlayerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_format_names_extension() {
        let err = PlayerError::UnsupportedFormat {
            extension: "xyz".to_string(),
        };
        assert_eq!(err.to_string(), "unsupported format: \"xyz\"");
    }

    #[test]
    fn symphonia_errors_map_to_decode() {
        let err: PlayerError = symphonia::core::errors::Error::DecodeError("bad header").into();
        assert!(matches!(err, PlayerError::Decode(_)));
    }
}
