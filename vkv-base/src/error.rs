// We want a few things here:
// 1. A way to create a new error with a backtrace
// 2. A way to centralize setting a breakpoint to trap any error in the system fairly soon
//    after it's created (or at least when it's propagated from a library we use back to us)
// 3. Same but for logging / emitting error messages into the tracing/logging system
// 4. A kind tag so callers at the RESP boundary (vkv-resp) know how to turn an
//    error into a wire response without downcasting.

use std::borrow::Cow;
use backtrace_error::DynBacktraceError;
use tracing::error;

#[cfg(test)]
use test_log::test;

// Error kinds, per the propagation policy: Parse/Command/Auth/Cluster are
// recovered locally (session emits a RESP error and continues); Transient
// is retried inside the store kernel and should never reach a session;
// Storage is surfaced as a command error at write time, aborts a checkpoint
// at checkpoint time; Fatal initiates orderly shutdown.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    Parse,
    Command,
    Auth,
    Cluster,
    Storage,
    Transient,
    Fatal,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    inner: DynBacktraceError,
}
pub type Result<T> = std::result::Result<T, Error>;

struct SimpleErr(Cow<'static, str>);
impl std::fmt::Debug for SimpleErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::fmt::Display for SimpleErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for SimpleErr {
    fn description(&self) -> &str {
        &self.0
    }
}

impl<E: std::error::Error + Send + Sync + 'static> From<E> for Error {
    fn from(err: E) -> Error {
        Error::new(ErrorKind::Storage, err)
    }
}

impl Error {
    pub fn new<E: std::error::Error + Send + Sync + 'static>(kind: ErrorKind, err: E) -> Error {
        error!(target: "vkv", kind = ?kind, "{:?}", err);
        let inner = DynBacktraceError::from(err);
        Error { kind, inner }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

pub fn err(msg: impl Into<Cow<'static, str>>) -> Error {
    err_kind(ErrorKind::Storage, msg)
}

pub fn err_kind(kind: ErrorKind, msg: impl Into<Cow<'static, str>>) -> Error {
    Error::new(kind, SimpleErr(msg.into()))
}

pub fn err_parse(msg: impl Into<Cow<'static, str>>) -> Error {
    err_kind(ErrorKind::Parse, msg)
}

pub fn err_command(msg: impl Into<Cow<'static, str>>) -> Error {
    err_kind(ErrorKind::Command, msg)
}

pub fn err_auth(msg: impl Into<Cow<'static, str>>) -> Error {
    err_kind(ErrorKind::Auth, msg)
}

pub fn err_cluster(msg: impl Into<Cow<'static, str>>) -> Error {
    err_kind(ErrorKind::Cluster, msg)
}

pub fn err_fatal(msg: impl Into<Cow<'static, str>>) -> Error {
    err_kind(ErrorKind::Fatal, msg)
}

#[test]
fn test_error() {
    let e = err("test error");
    assert_eq!(e.kind(), ErrorKind::Storage);
}

#[test]
fn test_error_kind_roundtrip() {
    let e = err_cluster("slot not owned").with_kind(ErrorKind::Cluster);
    assert_eq!(e.kind(), ErrorKind::Cluster);
}
