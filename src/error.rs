//! The single error type returned by every public operation in this crate.

use std::fmt;

pub type Result<T> = std::result::Result<T, GvrsError>;
pub type PassiveResult = Result<()>;

pub use std::io::Error as IoError;

/// Every fallible public operation returns one of these instead of unwinding.
/// Each variant carries the stable negative code of the existing wire protocol
/// (renumbered contiguously; the exact historical integers are not load-bearing).
#[derive(Debug)]
pub enum GvrsError {
    FileNotFound(String),
    FileAccess(String),
    InvalidFile(String),
    VersionNotSupported(String),
    ExclusiveOpen,
    NoMemory(String),
    PrematureEof,
    FileError(IoError),
    ElementNotFound(String),
    CoordinateOutOfBounds(String),
    CompressionNotImplemented(String),
    BadCompressionFormat(String),
    BadRasterSpecification(String),
    BadNameSpecification(String),
    BadIcfParameters(String),
    BadElementSpec(String),
    NullArgument(&'static str),
    NotOpenedForWriting,
    CompressionFailure(String),
    InternalError(String),
    NameNotUnique(String),
    InvalidParameter(String),
    CounterOverflow(String),
}

impl GvrsError {
    /// Stable negative-integer code for this error kind.
    pub fn code(&self) -> i32 {
        use GvrsError::*;
        match self {
            FileNotFound(_) => -1,
            FileAccess(_) => -2,
            InvalidFile(_) => -3,
            VersionNotSupported(_) => -4,
            ExclusiveOpen => -5,
            NoMemory(_) => -6,
            PrematureEof => -7,
            FileError(_) => -8,
            ElementNotFound(_) => -9,
            CoordinateOutOfBounds(_) => -10,
            CompressionNotImplemented(_) => -11,
            BadCompressionFormat(_) => -12,
            BadRasterSpecification(_) => -13,
            BadNameSpecification(_) => -14,
            BadIcfParameters(_) => -15,
            BadElementSpec(_) => -16,
            NullArgument(_) => -17,
            NotOpenedForWriting => -18,
            CompressionFailure(_) => -19,
            InternalError(_) => -20,
            NameNotUnique(_) => -21,
            InvalidParameter(_) => -22,
            CounterOverflow(_) => -23,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        GvrsError::InvalidFile(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        GvrsError::InternalError(message.into())
    }
}

impl fmt::Display for GvrsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use GvrsError::*;
        match self {
            FileNotFound(path) => write!(f, "file not found: {}", path),
            FileAccess(reason) => write!(f, "file access error: {}", reason),
            InvalidFile(reason) => write!(f, "invalid file: {}", reason),
            VersionNotSupported(version) => write!(f, "version not supported: {}", version),
            ExclusiveOpen => write!(f, "file is already opened for writing by another handle"),
            NoMemory(reason) => write!(f, "allocation failed: {}", reason),
            PrematureEof => write!(f, "premature end of file"),
            FileError(err) => write!(f, "file I/O error: {}", err),
            ElementNotFound(name) => write!(f, "element not found: {}", name),
            CoordinateOutOfBounds(reason) => write!(f, "coordinate out of bounds: {}", reason),
            CompressionNotImplemented(name) => write!(f, "compression codec not implemented: {}", name),
            BadCompressionFormat(reason) => write!(f, "malformed compressed data: {}", reason),
            BadRasterSpecification(reason) => write!(f, "bad raster specification: {}", reason),
            BadNameSpecification(name) => write!(f, "bad name specification: {}", name),
            BadIcfParameters(reason) => write!(f, "bad integer-coded-float parameters: {}", reason),
            BadElementSpec(reason) => write!(f, "bad element specification: {}", reason),
            NullArgument(name) => write!(f, "argument must not be empty/null: {}", name),
            NotOpenedForWriting => write!(f, "file handle was not opened for writing"),
            CompressionFailure(reason) => write!(f, "compression failed: {}", reason),
            InternalError(reason) => write!(f, "internal error: {}", reason),
            NameNotUnique(name) => write!(f, "name is not unique: {}", name),
            InvalidParameter(reason) => write!(f, "invalid parameter: {}", reason),
            CounterOverflow(reason) => write!(f, "counter overflow: {}", reason),
        }
    }
}

impl std::error::Error for GvrsError {}

/// Enable using the `?` operator on `io::Result`.
impl From<IoError> for GvrsError {
    fn from(error: IoError) -> Self {
        GvrsError::FileError(error)
    }
}
