use std::fmt;

/// The error taxonomy every provider call, git invocation, and config
/// validation failure collapses into. Every variant carries enough
/// context (provider, operation, optional resource) to build the final
/// summary's remediation hints without re-deriving them from a string.
#[derive(Debug, thiserror::Error)]
pub enum CorralError {
    #[error("{ctx}: validation failed: {message}")]
    Validation { ctx: ErrorContext, message: String },

    #[error("{ctx}: authentication failed: {message}")]
    Auth { ctx: ErrorContext, message: String },

    #[error("{ctx}: rate limited: {message}")]
    RateLimit {
        ctx: ErrorContext,
        message: String,
        retry_after: Option<std::time::Duration>,
    },

    #[error("{ctx}: network error: {message}")]
    Network { ctx: ErrorContext, message: String },

    #[error("{ctx}: timed out: {message}")]
    Timeout { ctx: ErrorContext, message: String },

    #[error("{ctx}: not found: {message}")]
    NotFound { ctx: ErrorContext, message: String },

    #[error("{ctx}: conflict: {message}")]
    Conflict { ctx: ErrorContext, message: String },

    #[error("{ctx}: git command failed: {message}")]
    GitCommand { ctx: ErrorContext, message: String },

    #[error("{ctx}: insufficient disk space: {message}")]
    DiskSpace { ctx: ErrorContext, message: String },

    #[error("{ctx}: permission denied: {message}")]
    Permissions { ctx: ErrorContext, message: String },

    #[error("{ctx}: cancelled")]
    Cancelled { ctx: ErrorContext },

    #[error("{ctx}: internal error: {message}")]
    Internal { ctx: ErrorContext, message: String },

    #[error("{ctx}: feature not supported: {message}")]
    NotSupported { ctx: ErrorContext, message: String },

    #[error("{ctx}: {message}")]
    Unknown { ctx: ErrorContext, message: String },
}

/// Identifies where an error originated: which provider, which
/// operation, and (when applicable) which repository.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub provider: Option<String>,
    pub operation: String,
    pub resource: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            provider: None,
            operation: operation.into(),
            resource: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.provider, &self.resource) {
            (Some(p), Some(r)) => write!(f, "[{p}] {} ({r})", self.operation),
            (Some(p), None) => write!(f, "[{p}] {}", self.operation),
            (None, Some(r)) => write!(f, "{} ({r})", self.operation),
            (None, None) => write!(f, "{}", self.operation),
        }
    }
}

impl CorralError {
    /// Whether the per-repository state machine (§4.3) should retry this
    /// error. `Cancelled` is always terminal; `NotFound`/`Auth`/`Conflict`/
    /// `Validation`/`Permissions`/`NotSupported` are never retried.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            CorralError::RateLimit { .. }
                | CorralError::Network { .. }
                | CorralError::Timeout { .. }
                | CorralError::Internal { .. }
        )
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            CorralError::Validation { ctx, .. }
            | CorralError::Auth { ctx, .. }
            | CorralError::RateLimit { ctx, .. }
            | CorralError::Network { ctx, .. }
            | CorralError::Timeout { ctx, .. }
            | CorralError::NotFound { ctx, .. }
            | CorralError::Conflict { ctx, .. }
            | CorralError::GitCommand { ctx, .. }
            | CorralError::DiskSpace { ctx, .. }
            | CorralError::Permissions { ctx, .. }
            | CorralError::Cancelled { ctx }
            | CorralError::Internal { ctx, .. }
            | CorralError::NotSupported { ctx, .. }
            | CorralError::Unknown { ctx, .. } => ctx,
        }
    }

    /// Map an HTTP status code the way §4.1's classifier mandates. This is
    /// the single authoritative classification point every provider
    /// adapter funnels its responses through.
    pub fn from_http_status(ctx: ErrorContext, status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 => CorralError::NotFound { ctx, message },
            401 | 403 => CorralError::Auth { ctx, message },
            429 => CorralError::RateLimit {
                ctx,
                message,
                retry_after: None,
            },
            409 => CorralError::Conflict { ctx, message },
            500..=599 => CorralError::Internal { ctx, message },
            _ => CorralError::Unknown { ctx, message },
        }
    }

    pub fn cancelled(ctx: ErrorContext) -> Self {
        CorralError::Cancelled { ctx }
    }

    /// Which remediation bucket the final summary should file this error
    /// under (§7: "auth -> check credentials; rate limit -> lower
    /// parallelism; disk -> free space; network -> retry").
    pub fn remediation(&self) -> &'static str {
        match self {
            CorralError::Auth { .. } => "check credentials",
            CorralError::RateLimit { .. } => "lower parallelism",
            CorralError::DiskSpace { .. } => "free disk space",
            CorralError::Network { .. } | CorralError::Timeout { .. } => "retry",
            CorralError::NotFound { .. } => "verify the repository still exists",
            CorralError::Conflict { .. } => "inspect the local working tree for conflicts",
            CorralError::GitCommand { .. } => "inspect git output",
            CorralError::Permissions { .. } => "check filesystem permissions",
            CorralError::NotSupported { .. } => "this provider does not support the operation",
            CorralError::Cancelled { .. } => "run was cancelled",
            CorralError::Validation { .. } => "fix the configuration",
            CorralError::Internal { .. } | CorralError::Unknown { .. } => "inspect the error message",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_classification_matches_spec() {
        let ctx = ErrorContext::new("list_repositories");
        assert!(matches!(
            CorralError::from_http_status(ctx.clone(), 404, "x"),
            CorralError::NotFound { .. }
        ));
        assert!(matches!(
            CorralError::from_http_status(ctx.clone(), 401, "x"),
            CorralError::Auth { .. }
        ));
        assert!(matches!(
            CorralError::from_http_status(ctx.clone(), 403, "x"),
            CorralError::Auth { .. }
        ));
        assert!(matches!(
            CorralError::from_http_status(ctx.clone(), 429, "x"),
            CorralError::RateLimit { .. }
        ));
        assert!(matches!(
            CorralError::from_http_status(ctx.clone(), 409, "x"),
            CorralError::Conflict { .. }
        ));
        assert!(matches!(
            CorralError::from_http_status(ctx, 503, "x"),
            CorralError::Internal { .. }
        ));
    }

    #[test]
    fn retryable_matches_classifier_table() {
        let ctx = ErrorContext::new("op");
        assert!(CorralError::from_http_status(ctx.clone(), 429, "x").retryable());
        assert!(CorralError::from_http_status(ctx.clone(), 503, "x").retryable());
        assert!(!CorralError::from_http_status(ctx.clone(), 404, "x").retryable());
        assert!(!CorralError::from_http_status(ctx.clone(), 401, "x").retryable());
        assert!(!CorralError::cancelled(ctx).retryable());
    }

    #[test]
    fn context_display_includes_provider_and_resource() {
        let ctx = ErrorContext::new("clone_repository")
            .with_provider("github")
            .with_resource("acme/widgets");
        assert_eq!(ctx.to_string(), "[github] clone_repository (acme/widgets)");
    }
}
