//! Error taxonomy shared by every harvesting component.
//!
//! Setup failures ([`HarvestError::Configuration`], [`HarvestError::Lookup`],
//! [`HarvestError::Inactive`]) abort an invocation. Everything else is a
//! per-record failure: the pipeline records it on the ledger row and retries
//! it on later runs until the retry budget is spent.

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum HarvestError {
    /// Bad or missing harvester configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No collector or sink implementation supports the requested protocol/schema.
    #[error("{0}")]
    Lookup(String),

    /// Network or HTTP failure talking to a datasource, repository or CMS.
    #[error("{message}")]
    Transport {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A remote call answered, but not with anything we can use.
    #[error("{message}")]
    ResponseFormat {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The record cannot be assigned to exactly one granule.
    #[error("{0}")]
    Granularity(String),

    /// More than one existing record matched a granule.
    #[error("{0}")]
    Ambiguity(String),

    /// A metadata field required for matching or merging is missing or malformed.
    #[error("{0}")]
    InvalidMetadata(String),

    /// Harvesting was requested on a harvester that is not Active.
    #[error("cannot harvest: harvester status is {0}")]
    Inactive(String),
}

impl HarvestError {
    pub fn transport(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        HarvestError::Transport {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn response_format(message: impl Into<String>) -> Self {
        HarvestError::ResponseFormat {
            message: message.into(),
            source: None,
        }
    }

    pub fn response_format_from(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        HarvestError::ResponseFormat {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Render the error with its full cause chain, one cause per line.
    ///
    /// This is what gets stored in a ledger row's `last_error`.
    pub fn diagnostic(&self) -> String {
        let mut out = self.to_string();
        let mut cause = std::error::Error::source(self);
        while let Some(err) = cause {
            out.push_str("\nCaused by: ");
            out.push_str(&err.to_string());
            cause = err.source();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_includes_cause_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        let err = HarvestError::transport("Error requesting http://example.org/", io);
        let diag = err.diagnostic();
        assert!(diag.starts_with("Error requesting http://example.org/"));
        assert!(diag.contains("Caused by: connection refused"));
    }
}
