//! Error types surfaced by netsweep.
//!
//! Only input problems ever reach the caller: a malformed range, a host that
//! cannot be resolved, or a broken configuration file. Everything that goes
//! wrong while a probe is in flight is folded into a [`Signal`] instead.
//!
//! [`Signal`]: crate::probe::Signal
use std::io;
use thiserror::Error;

/// Errors returned by the public scanning API.
#[derive(Debug, Error)]
pub enum ScanError {
    /// An address range or port list could not be parsed.
    #[error("malformed range '{input}': {reason}")]
    MalformedRange { input: String, reason: String },

    /// A valid range that would expand to more addresses than allowed.
    #[error("range '{input}' expands to {size} addresses, the limit is {limit}")]
    RangeTooLarge {
        input: String,
        size: u64,
        limit: usize,
    },

    /// The host given to a port scan has no IPv4 address.
    #[error("could not resolve host '{0}' to an IPv4 address")]
    UnresolvableHost(String),

    /// A primitive needed by a channel is missing from this environment.
    #[error("{0} is not supported in this environment")]
    UnsupportedEnvironment(String),

    /// The configuration file exists but could not be used.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ScanError {
    pub(crate) fn malformed(input: &str, reason: impl Into<String>) -> Self {
        Self::MalformedRange {
            input: input.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Failure of a single probe. Never returned to callers, channels turn it into
/// an `Error` or `TimedOut` signal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("probe timed out")]
    Timeout,
}

impl From<io::Error> for ProbeError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::TimedOut {
            Self::Timeout
        } else {
            Self::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_message_names_input() {
        let err = ScanError::malformed("10.0.x.1", "octet 'x' is not a number");
        assert_eq!(
            err.to_string(),
            "malformed range '10.0.x.1': octet 'x' is not a number"
        );
    }

    #[test]
    fn io_timeout_becomes_probe_timeout() {
        let err = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert_eq!(ProbeError::from(err), ProbeError::Timeout);

        let err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(ProbeError::from(err), ProbeError::Transport(_)));
    }
}
