use failure::Fail;

/// Everything that can go wrong while trimming one clip or preparing a batch.
#[derive(Debug, Fail)]
pub enum TrimError {
    #[fail(display = "decode error: {}", reason)]
    Decode { reason: String },

    #[fail(display = "clip has {} usable frame(s), motion cannot be computed", usable)]
    EmptyClip { usable: usize },

    #[fail(display = "write error: {}", reason)]
    Write { reason: String },

    #[fail(display = "invalid configuration: {}", _0)]
    Config(String),

    #[fail(display = "cancelled")]
    Cancelled,

    #[fail(display = "io error: {}", _0)]
    Io(#[cause] std::io::Error),
}

impl TrimError {
    pub fn decode<E: std::fmt::Display>(err: E) -> Self {
        TrimError::Decode {
            reason: err.to_string(),
        }
    }

    pub fn write<E: std::fmt::Display>(err: E) -> Self {
        TrimError::Write {
            reason: err.to_string(),
        }
    }
}

impl From<std::io::Error> for TrimError {
    fn from(err: std::io::Error) -> Self {
        TrimError::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, TrimError>;
