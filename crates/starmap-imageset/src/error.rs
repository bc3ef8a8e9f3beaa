//! Imageset error types.

/// Errors raised while loading or validating imageset descriptors.
#[derive(Debug, thiserror::Error)]
pub enum ImagesetError {
    /// The library file could not be read.
    #[error("failed to read imageset library: {0}")]
    Io(#[source] std::io::Error),

    /// The library file is not valid RON.
    #[error("failed to parse imageset library: {0}")]
    Parse(#[source] ron::error::SpannedError),

    /// The quad-tree character map must hold exactly one character per quadrant.
    #[error("imageset '{name}': quad-tree map must have 4 characters, got {map:?}")]
    InvalidQuadTreeMap { name: String, map: String },

    /// A required descriptor field is empty.
    #[error("imageset '{name}': missing {field}")]
    MissingField { name: String, field: &'static str },

    /// Two descriptors in one library share a name.
    #[error("duplicate imageset name '{0}'")]
    DuplicateName(String),

    /// A HiPS `properties` file lacks a usable value.
    #[error("invalid HiPS properties: {0}")]
    HipsProperties(String),
}
