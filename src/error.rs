use crate::serde::{DeserializeError, SerializeError};

/// Represents errors that can occur in the storage engine
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Serialization failed
    Serialize(SerializeError),

    /// Deserialization failed
    Deserialize(DeserializeError),

    /// On-disk data is malformed (torn record, checksum mismatch, bad magic, ...)
    Corruption(String),

    /// The caller supplied an argument or configuration the engine cannot use
    InvalidArgument(String),

    /// The operation is not supported by this build of the engine
    NotSupported(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SiltError: {self:?}")
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<SerializeError> for Error {
    fn from(value: SerializeError) -> Self {
        Self::Serialize(value)
    }
}

impl From<DeserializeError> for Error {
    fn from(value: DeserializeError) -> Self {
        Self::Deserialize(value)
    }
}

impl Error {
    /// Returns `true` if this error marks on-disk corruption
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption(_))
    }

    // The background error is kept around and handed to every subsequent
    // writer, so it needs to be duplicable. `std::io::Error` is not `Clone`,
    // hence this instead of a derive.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
            Self::Serialize(SerializeError::Io(e)) => Self::Serialize(SerializeError::Io(
                std::io::Error::new(e.kind(), e.to_string()),
            )),
            Self::Deserialize(DeserializeError::Io(e)) => Self::Deserialize(DeserializeError::Io(
                std::io::Error::new(e.kind(), e.to_string()),
            )),
            Self::Deserialize(DeserializeError::InvalidTag(t)) => {
                Self::Deserialize(DeserializeError::InvalidTag(*t))
            }
            Self::Corruption(msg) => Self::Corruption(msg.clone()),
            Self::InvalidArgument(msg) => Self::InvalidArgument(msg.clone()),
            Self::NotSupported(msg) => Self::NotSupported(msg.clone()),
        }
    }
}

/// Engine result
pub type Result<T> = std::result::Result<T, Error>;
