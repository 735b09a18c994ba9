use thiserror::Error;

/// Failures the controller handles locally; callers only ever see booleans.
#[derive(Debug, Error)]
pub enum AppletError {
    #[error("applet runtime is not available")]
    RuntimeUnavailable,

    #[error("container element `{container}` not found")]
    ContainerMissing { container: String },

    #[error("command `{command}` was rejected: {reason}")]
    EvaluationFailure { command: String, reason: String },

    #[error("could not serialize the current document: {reason}")]
    SerializationFailure { reason: String },
}
