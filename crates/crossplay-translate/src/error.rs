//! Error types for packet translation.
//!
//! None of these ever close a session: the registry logs them and drops
//! the packet that caused them.

/// Errors a translator may return for a single packet.
#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    /// A mapping table has no entry for this id.
    #[error("no {table} mapping for {id}")]
    NoMapping { table: &'static str, id: i32 },

    /// A field holds a value the other edition cannot represent.
    #[error("invalid {field}: {detail}")]
    InvalidValue { field: &'static str, detail: String },

    /// The translator needs session state that is not there yet.
    #[error("missing session state: {0}")]
    MissingContext(&'static str),
}

impl TranslateError {
    /// Returns `true` when the packet simply has no translation, as
    /// opposed to failing to convert.
    pub fn is_unmapped(&self) -> bool {
        matches!(self, Self::NoMapping { .. })
    }
}
