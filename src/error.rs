use thiserror::Error;

/// Result type alias for packing operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading designs, packing materials or
/// talking to the collaborators around the pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// Filesystem access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A document could not be parsed as XML.
    #[error("Invalid document: {0}")]
    Xml(String),

    /// A JSON configuration or registry file could not be parsed.
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Geometry extraction failed.
    #[error("Geometry error: {0}")]
    Geometry(String),

    /// The nesting oracle rejected its input.
    #[error("Nesting failed: {0}")]
    Nesting(String),

    /// A preview could not be rasterized.
    #[error("Render failed: {0}")]
    Render(String),

    /// No material with this name is registered.
    #[error("Unknown material: {0}")]
    UnknownMaterial(String),

    #[error("Material {material} has no sheet {sheet}")]
    UnknownSheet { material: String, sheet: usize },

    /// A packing pass is already running.
    #[error("A packing pass is already in flight")]
    PassInFlight,

    /// No packing pass has been submitted.
    #[error("No packing pass is outstanding")]
    NoPassOutstanding,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<roxmltree::Error> for Error {
    fn from(e: roxmltree::Error) -> Self {
        Error::Xml(e.to_string())
    }
}
