//! Error types shared by parsing, allocation and filling.

use thiserror::Error;

/// Errors raised while parsing a script or running a generation pass.
///
/// None of these are recovered inside the library: a pass either yields a fully
/// allocated and filled tree or one of these errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Grammar/syntax failure, or a script without a root.
    #[error("parse error: {0}")]
    Parse(String),

    /// A field, function or template name that was never declared/registered.
    #[error("unregistered name: {0}")]
    UnregisteredName(String),

    /// Content wider than the field it is written into.
    #[error("content of {len} units does not fit a field of {size} units")]
    InvalidFieldSize { len: usize, size: usize },

    /// Field access outside `[0, size)`.
    #[error("index {index} out of range for a field of {size} units")]
    InvalidIndex { index: usize, size: usize },

    /// An operation applied to a field of the wrong kind (e.g. `count` on a block).
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Identifier with no live field in the current pass (e.g. an unselected choice branch).
    #[error("field `{0}` has no live binding in this pass")]
    UnboundField(String),

    /// A field's content was read before its own fill step ran.
    #[error("field `{source_name}` is read by `{target}` before it has been filled")]
    FillOrder { source_name: String, target: String },

    /// `min > max` in a size or repeat bound.
    #[error("invalid bounds [{min}, {max}]")]
    InvalidBounds { min: usize, max: usize },

    /// A declaration or generated tree larger than [`MAX_UNITS`](crate::value::MAX_UNITS).
    #[error("{units} units exceed the limit of {limit}")]
    TooLarge { units: usize, limit: usize },
}

/// Result alias for fuzzdsl operations.
pub type Result<T> = std::result::Result<T, Error>;
