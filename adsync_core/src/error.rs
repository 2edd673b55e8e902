use std::error::Error as StdError;

/// Common error type for the sync pipeline.
///
/// The first four variants are the pipeline taxonomy: upstream API failures,
/// payload normalization failures, and rejected write batches. Concrete
/// backends should preserve the underlying error chain via `Error::backend`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Graph API answered with a non-2xx status.
    #[error("upstream error: status {status}: {body}")]
    Upstream { status: u16, body: String },

    /// Graph API answered 2xx but the payload or pagination was unusable.
    #[error("upstream error: {0}")]
    UpstreamMessage(String),

    #[error("normalization error: {0}")]
    Normalization(String),

    /// The destination store rejected a whole batch.
    #[error("write error on {table}: {message}")]
    Write {
        table: String,
        status: Option<u16>,
        message: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("backend error: {context}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },
}

impl Error {
    #[tracing::instrument(level = "debug", name = "adsync.error.backend", skip(source))]
    pub fn backend(
        context: impl Into<String> + std::fmt::Debug,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Convenience: wrap any error into `Backend` with "reqwest" context.
    pub fn backend_reqwest(source: impl StdError + Send + Sync + 'static) -> Self {
        Self::Backend {
            context: "reqwest".into(),
            source: Box::new(source),
        }
    }

    pub fn normalization(message: impl Into<String>) -> Self {
        Self::Normalization(message.into())
    }

    /// Errors that will fail the same way on every redelivery.
    ///
    /// The consumer dead-letters these immediately instead of burning attempts.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Error::InvalidInput(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_error_carries_provider_body() {
        let err = Error::Upstream {
            status: 400,
            body: r#"{"error":{"message":"Invalid OAuth access token"}}"#.to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("400"));
        assert!(msg.contains("Invalid OAuth access token"));
    }

    #[test]
    fn only_input_errors_are_permanent() {
        assert!(Error::InvalidInput("accountId required".into()).is_permanent());
        assert!(!Error::normalization("bad record").is_permanent());
        assert!(
            !Error::Write {
                table: "facebook_ads".into(),
                status: Some(400),
                message: "schema mismatch".into(),
            }
            .is_permanent()
        );
    }
}
