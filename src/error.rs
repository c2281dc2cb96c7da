// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use std::fmt::{self, Display};
use std::io;
use tokio::sync::mpsc;

/// Error kinds surfaced by the core, matching the broker's error-handling
/// design: each kind carries its own propagation policy at the call site
/// (retry, reject-frame, disconnect, or log-and-skip).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// `#` not last, empty filter, or other malformed topic filter.
    InvalidTopicFilter,

    /// An internal bounded queue (subscription write, message enqueue,
    /// delivery push) is full.
    BackpressureExceeded,

    /// A persistent store is unreachable; the caller should retry with
    /// backoff and degrade to in-memory-only operation.
    StoreUnavailable,

    /// The authorizer rejected a publish or subscribe.
    NotAuthorized,

    /// The client's socket was closed mid-send.
    ClientGone,

    /// The same `messageUuid` was enqueued twice; the operation is a no-op.
    DuplicateUuid,

    /// A cluster-wide named lock could not be acquired before its timeout.
    LockAcquisitionFailed,

    /// Error occurred while performing I/O against a store backend.
    IoError,

    /// mpsc channel error: the receiving half of a component was dropped.
    ChannelError,

    /// Configuration is invalid or incomplete.
    ConfigError,

    /// A session, client, or topic row was expected but not found.
    NotFound,

    /// The Session Handler's startup rebuild (topic index, retained
    /// index) has not finished; CONNECT is rejected until it has.
    NotReady,
}

#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::new(ErrorKind::IoError, format!("io error: {err}"))
    }
}

/// Generates a `From<mpsc::error::SendError<$cmd_type>>` impl for a command
/// enum, so component loops can use `?` when forwarding to a sibling's
/// channel instead of matching on the send result by hand.
macro_rules! convert_send_error {
    ($cmd_type:ty) => {
        impl From<mpsc::error::SendError<$cmd_type>> for Error {
            fn from(err: mpsc::error::SendError<$cmd_type>) -> Self {
                Error::new(
                    ErrorKind::ChannelError,
                    format!("channel closed while sending {}: {}", stringify!($cmd_type), err),
                )
            }
        }
    };
}

pub(crate) use convert_send_error;

#[cfg(feature = "pgsql_conn")]
impl From<tokio_postgres::Error> for Error {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::new(ErrorKind::StoreUnavailable, format!("postgres error: {err}"))
    }
}

#[cfg(feature = "mongodb_conn")]
impl From<mongodb::error::Error> for Error {
    fn from(err: mongodb::error::Error) -> Self {
        Self::new(ErrorKind::StoreUnavailable, format!("mongodb error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = Error::new(ErrorKind::InvalidTopicFilter, "bad filter: a/#/b");
        assert_eq!(err.kind(), &ErrorKind::InvalidTopicFilter);
        assert!(err.to_string().contains("InvalidTopicFilter"));
        assert!(err.to_string().contains("a/#/b"));
    }
}
