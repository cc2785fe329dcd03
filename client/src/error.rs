//! library error types.
//!
//! the public facing [Error] type offers format and display based handling.
//! typed handling is done with runtime downcast to the concrete error types
//! this module exports.

use core::{
    convert::Infallible,
    fmt,
    ops::{Deref, DerefMut},
};

use std::error;

use crate::frame::ValueType;

/// public facing error type. providing basic format and display based error handling.
///
/// for typed based error handling runtime type cast is needed with the help of other
/// public error types offered by this module.
///
/// # Example
/// ```rust
/// use strata_client::error::{Canceled, Error};
///
/// fn is_canceled(e: &Error) -> bool {
///     // downcast error to Canceled to check if a blocking operation was canceled.
///     e.downcast_ref::<Canceled>().is_some()
/// }
/// ```
pub struct Error(Box<dyn error::Error + Send + Sync>);

impl Error {
    /// true when a blocking operation was canceled through its cancellation signal.
    pub fn is_canceled(&self) -> bool {
        self.0.is::<Canceled>()
    }

    /// true when a bounded wait gave up on its deadline.
    pub fn is_timeout(&self) -> bool {
        self.0.is::<Timeout>()
    }

    /// true when a producer hit a buffer that stopped supplying.
    pub fn is_closed_queue(&self) -> bool {
        self.0.is::<ClosedQueue>()
    }

    /// true when the transport side of a pipeline is gone.
    pub fn is_transport(&self) -> bool {
        self.0.is::<TransportBroken>()
    }
}

impl Deref for Error {
    type Target = dyn error::Error + Send + Sync;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl DerefMut for Error {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.0
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.0.source()
    }
}

impl From<Infallible> for Error {
    fn from(e: Infallible) -> Self {
        match e {}
    }
}

macro_rules! unit_error {
    ($(#[$attr:meta])* $name:ident, $display:literal) => {
        $(#[$attr])*
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
        pub struct $name;

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str($display)
            }
        }

        impl error::Error for $name {}

        impl From<$name> for Error {
            fn from(e: $name) -> Self {
                Self(Box::new(e))
            }
        }
    };
}

unit_error!(
    /// a component that can only be started once was started twice.
    AlreadyStarted,
    "component is already started"
);

unit_error!(
    /// an operation that requires an open stream was called before `open_stream`
    /// or after shutdown.
    NotOpen,
    "stream is not open"
);

unit_error!(
    /// a producer offered a message to a buffer that is no longer supplying.
    ClosedQueue,
    "message buffer is no longer supplying"
);

unit_error!(
    /// a bounded wait reached its deadline.
    Timeout,
    "operation timed out"
);

unit_error!(
    /// a blocking operation observed its cancellation signal.
    Canceled,
    "operation canceled"
);

unit_error!(
    /// a blocking operation was interrupted below the transport.
    Interrupted,
    "operation interrupted"
);

unit_error!(
    /// a buffer reported messages after it finished draining. this breaks the
    /// after drain invariant and terminates the pipeline.
    BufferUnderflow,
    "message buffer underflow after drain"
);

/// caller supplied arguments violate an interface contract.
#[derive(Debug)]
pub struct InvalidArgument(pub String);

impl fmt::Display for InvalidArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid argument: {}", self.0)
    }
}

impl error::Error for InvalidArgument {}

impl From<InvalidArgument> for Error {
    fn from(e: InvalidArgument) -> Self {
        Self(Box::new(e))
    }
}

/// a pipeline component failed to initialize. fatal.
#[derive(Debug)]
pub struct InitializationError(pub String);

impl fmt::Display for InitializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "initialization failed: {}", self.0)
    }
}

impl error::Error for InitializationError {}

impl From<InitializationError> for Error {
    fn from(e: InitializationError) -> Self {
        Self(Box::new(e))
    }
}

/// the transport below a pipeline is gone or refused an operation.
///
/// requests related to this error may or may not have reached the service and
/// must not be retried blindly.
#[derive(Debug)]
pub struct TransportBroken(pub String);

impl fmt::Display for TransportBroken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport broken: {}", self.0)
    }
}

impl error::Error for TransportBroken {}

impl From<TransportBroken> for Error {
    fn from(e: TransportBroken) -> Self {
        Self(Box::new(e))
    }
}

/// a raw bucket whose value column length does not match its timestamp count.
///
/// attached to the offending source and query request. the bucket is skipped
/// and correlation continues.
#[derive(Debug, Clone)]
pub struct MalformedBucket {
    pub source: String,
    pub request_id: String,
    pub timestamp_count: usize,
    pub column_length: usize,
}

impl fmt::Display for MalformedBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "malformed bucket for source {} in request {}: {} timestamps against {} values",
            self.source, self.request_id, self.timestamp_count, self.column_length
        )
    }
}

impl error::Error for MalformedBucket {}

impl From<MalformedBucket> for Error {
    fn from(e: MalformedBucket) -> Self {
        Self(Box::new(e))
    }
}

/// a source declared different primitive types in different blocks of one aggregate.
#[derive(Debug, Clone)]
pub struct InconsistentSourceType {
    pub source: String,
    pub first: ValueType,
    pub other: ValueType,
}

impl fmt::Display for InconsistentSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "source {} declared as {} and {} in the same aggregate",
            self.source, self.first, self.other
        )
    }
}

impl error::Error for InconsistentSourceType {}

impl From<InconsistentSourceType> for Error {
    fn from(e: InconsistentSourceType) -> Self {
        Self(Box::new(e))
    }
}

/// an assembled aggregate violates block ordering or domain disjointness.
#[derive(Debug)]
pub struct AggregateIntegrity(pub String);

impl fmt::Display for AggregateIntegrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "aggregate integrity violated: {}", self.0)
    }
}

impl error::Error for AggregateIntegrity {}

impl From<AggregateIntegrity> for Error {
    fn from(e: AggregateIntegrity) -> Self {
        Self(Box::new(e))
    }
}

/// configuration parameter error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    UnknownParam(String),
    InvalidValue { key: String, value: String },
    MissingValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownParam(key) => write!(f, "unknown configuration parameter: {key}"),
            Self::InvalidValue { key, value } => {
                write!(f, "invalid value {value:?} for configuration parameter {key}")
            }
            Self::MissingValue(key) => write!(f, "missing value for configuration parameter {key}"),
        }
    }
}

impl error::Error for ConfigError {}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self(Box::new(e))
    }
}

impl From<String> for Error {
    fn from(e: String) -> Self {
        Self(e.into())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn downcast() {
        let e = Error::from(Canceled);
        assert!(e.is_canceled());
        assert!(!e.is_timeout());
        assert!(e.downcast_ref::<Canceled>().is_some());
    }

    #[test]
    fn display() {
        let e = Error::from(MalformedBucket {
            source: "S1".into(),
            request_id: "q-7".into(),
            timestamp_count: 10,
            column_length: 9,
        });
        let rendered = e.to_string();
        assert!(rendered.contains("S1"));
        assert!(rendered.contains("q-7"));
    }
}
