use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReviewError>;

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("cannot decode admission review: {0}")]
    DecodeEnvelope(#[source] serde_json::Error),

    #[error("admission request {uid} carries no object")]
    MissingObject { uid: String },

    #[error("cannot decode object of admission request {uid}: {source}")]
    DecodeObject {
        uid: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot encode patch: {0}")]
    EncodePatch(#[source] serde_json::Error),
}

impl ReviewError {
    /// HTTP-like code reported inside of the AdmissionResponse status
    pub fn code(&self) -> u16 {
        match self {
            ReviewError::DecodeEnvelope(_)
            | ReviewError::MissingObject { .. }
            | ReviewError::DecodeObject { .. } => 400,
            ReviewError::EncodePatch(_) => 500,
        }
    }
}
