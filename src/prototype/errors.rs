use thiserror::Error;

/// Errors that can arise while normalizing, validating, spawning or storing prototypes.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Wrapper around JSON errors (prototype files, CLI output).
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Wrapper around IO errors (directory creation, prototype files).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Returned when fetching a prototype or entity that is not present.
    #[error("not found: {0}")]
    NotFound(String),

    /// A lookup matched more than one prototype or entity.
    #[error("'{query}' is ambiguous, matches: {}", matches.join(", "))]
    Ambiguous { query: String, matches: Vec<String> },

    /// Hard validation failure; the prototype must not be saved or spawned.
    #[error("prototype {name} failed validation:\n{}", errors.join("\n"))]
    Validation { name: String, errors: Vec<String> },

    /// Soft validation failure; informational for mixins, blocks spawning as a final object.
    #[error("prototype {name} has warnings:\n{}", warnings.join("\n"))]
    Warning { name: String, warnings: Vec<String> },

    /// Permission denied (read-only prototype, failed lock, missing privilege).
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Embedded function call could not be evaluated.
    #[error("expression error: {0}")]
    Expression(String),

    /// A tag, attribute or diff record had the wrong shape.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// Returned when deserializing a record with an unexpected schema version.
    #[error("schema mismatch for {entity}: expected {expected}, got {found}")]
    SchemaMismatch {
        entity: &'static str,
        expected: u8,
        found: u8,
    },

    /// Internal error (unexpected conditions)
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProtoError {
    /// True for the soft warning class that callers may choose to treat as informational.
    pub fn is_warning(&self) -> bool {
        matches!(self, ProtoError::Warning { .. })
    }
}
