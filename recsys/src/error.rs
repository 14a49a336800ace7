use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The result type used in the entire recommender crate.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The recommender crate's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    InvalidArchitecture(String),
    InvalidConfig(String),
    InvalidMetric(String),
    InvalidDistribution(String),
    IndexOutOfRange {
        index: usize,
        len: usize,
    },
    SingularMatrix {
        dim: usize,
    },
    CheckpointMismatch {
        expected: &'static str,
        got: &'static str,
    },
    MalformedMatrixFile(String),
    Shape(ndarray::ShapeError),
    Format(serde_json::Error),
    Io(io::Error),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch for {what}, got {got} and expected {expected}"
            ),
            MlErr::InvalidArchitecture(msg) => write!(f, "invalid architecture: {msg}"),
            MlErr::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            MlErr::InvalidMetric(name) => write!(f, "unknown metric {name:?}"),
            MlErr::InvalidDistribution(msg) => write!(f, "invalid distribution: {msg}"),
            MlErr::IndexOutOfRange { index, len } => {
                write!(f, "index {index} is out of range for {len} items")
            }
            MlErr::SingularMatrix { dim } => {
                write!(f, "the {dim}x{dim} system matrix is not invertible")
            }
            MlErr::CheckpointMismatch { expected, got } => write!(
                f,
                "checkpoint belongs to the {got} family but a {expected} checkpoint was expected"
            ),
            MlErr::MalformedMatrixFile(msg) => write!(f, "malformed matrix file: {msg}"),
            MlErr::Shape(e) => write!(f, "shape error: {e}"),
            MlErr::Format(e) => write!(f, "format error: {e}"),
            MlErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Shape(e) => Some(e),
            MlErr::Format(e) => Some(e),
            MlErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for MlErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for MlErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Format(value)
    }
}

impl From<ndarray::ShapeError> for MlErr {
    fn from(value: ndarray::ShapeError) -> Self {
        Self::Shape(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<MlErr> for io::Error {
    fn from(value: MlErr) -> Self {
        match value {
            MlErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
