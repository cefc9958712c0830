//! Error taxonomy for context, program and pipeline operations
//!
//! Every fallible operation returns [`Error`], which groups failures into the
//! four categories callers care about: bad declarations, unavailable resources,
//! lifetime misuse and fatal build failures. Non-fatal build problems are not
//! errors; they are reported as [`BuildWarning`]s alongside a built pipeline.

use crate::{PipelineHandle, ProgramHandle, VariableType};
use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error returned by every fallible operation
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid variable declarations or parameter writes
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Device or binary resources could not be acquired
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Handle or context used outside of its lifetime
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// Pipeline build failed
    #[error(transparent)]
    Build(#[from] BuildError),
}

/// A variable declaration table rejected at validation time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// A declaration has an empty name
    #[error("variable #{index} has an empty name")]
    EmptyName {
        /// Position of the declaration in the table
        index: usize,
    },

    /// Two declarations share a name
    #[error("variable `{name}` is declared more than once")]
    DuplicateName {
        /// The repeated name
        name: String,
    },

    /// The parameter struct exceeds [`crate::MAX_STRUCT_SIZE`]
    #[error("parameter struct of {struct_size} bytes exceeds the {max}-byte limit")]
    StructTooLarge {
        /// Declared struct size
        struct_size: usize,
        /// Largest accepted size
        max: usize,
    },

    /// A declaration starts outside of the parameter struct
    #[error("variable `{name}` has offset {offset}, outside of the {struct_size}-byte parameter struct")]
    OffsetOutOfRange {
        /// Variable name
        name: String,
        /// Declared byte offset
        offset: usize,
        /// Declared struct size
        struct_size: usize,
    },

    /// A declaration starts inside the struct but runs past its end
    #[error("variable `{name}` ({size} bytes at offset {offset}) runs past the end of the {struct_size}-byte parameter struct")]
    FieldOverrun {
        /// Variable name
        name: String,
        /// Declared byte offset
        offset: usize,
        /// Size of the declared type
        size: usize,
        /// Declared struct size
        struct_size: usize,
    },

    /// Two declarations cover overlapping byte ranges
    #[error("variables `{first}` and `{second}` overlap")]
    Overlap {
        /// Variable declared first
        first: String,
        /// Variable declared second
        second: String,
    },
}

/// Bad declarations or parameter writes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// The declaration table failed validation
    #[error("invalid variable layout: {0}")]
    InvalidLayout(#[from] LayoutError),

    /// No variable with this name is declared
    #[error("no variable named `{name}` is declared")]
    NotFound {
        /// Requested name
        name: String,
    },

    /// A typed write does not match the declared type
    #[error("variable `{name}` is declared as {declared} but was written as {provided}")]
    TypeMismatch {
        /// Variable name
        name: String,
        /// Declared type
        declared: VariableType,
        /// Type of the written value
        provided: VariableType,
    },

    /// A raw write does not match the declared size
    #[error("`{name}` expects {expected} bytes but {provided} were written")]
    SizeMismatch {
        /// Variable or struct name
        name: String,
        /// Declared size in bytes
        expected: usize,
        /// Size of the written data in bytes
        provided: usize,
    },
}

/// Devices or binaries that could not be used
#[derive(Debug, Error)]
pub enum ResourceError {
    /// Fewer devices than requested were found
    #[error("no device available: requested {requested}, found {available}")]
    NoDeviceAvailable {
        /// Number of devices requested (0 means all)
        requested: usize,
        /// Number of devices found
        available: usize,
    },

    /// The context already issued every program index a handle can hold
    #[error("program registry is full ({registered} programs registered)")]
    TooManyPrograms {
        /// Number of slots ever allocated
        registered: usize,
    },

    /// The shader binary is empty
    #[error("shader binary is empty")]
    InvalidBinary,

    /// The driver refused to open a device
    #[error("failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    /// Host-side shader translation failed
    #[error("shader translation failed: {0}")]
    Shader(String),
}

/// Handles or contexts used outside of their lifetime
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// The program was already released
    #[error("{0} was already released")]
    DoubleRelease(ProgramHandle),

    /// The program belongs to a different context
    #[error("{0} does not belong to this context")]
    ForeignHandle(ProgramHandle),

    /// The context was destroyed
    #[error("context was already destroyed")]
    UseAfterDestroy,

    /// The pipeline was rebuilt or invalidated since this handle was issued
    #[error("{0} is stale; rebuild the pipeline")]
    StalePipeline(PipelineHandle),
}

/// Fatal pipeline build failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// A program failed to compile or link on a device
    #[error("{program} failed to compile on device `{device}`: {message}")]
    Compilation {
        /// The failing program
        program: ProgramHandle,
        /// Name of the device that rejected it
        device: String,
        /// Driver or validator message
        message: String,
    },
}

/// Non-fatal build problems; the pipeline is still produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BuildWarning {
    /// No programs were registered; the pipeline is inert
    #[error("no programs registered; the pipeline cannot launch anything")]
    NoPrograms,

    /// Programs were registered but none of them generates rays
    #[error("no ray generation program registered")]
    NoRayGenProgram,
}

impl From<LayoutError> for Error {
    fn from(error: LayoutError) -> Self {
        Error::Configuration(error.into())
    }
}
