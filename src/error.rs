use thiserror::Error;

/// Kernel error types.
///
/// Every system call returns `Result<T, Error>`; the variants cover resource
/// exhaustion, invalid arguments, rendezvous failures and closed streams.
/// Invariant violations are not represented here — they abort the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("process table exhausted")]
    NoProcess,
    #[error("no such child process")]
    NoChild,
    #[error("no such joinable thread")]
    NoThread,
    #[error("out of file descriptors")]
    NoFile,
    #[error("invalid file descriptor")]
    BadFid,
    #[error("invalid port")]
    BadPort,
    #[error("port already has a listener")]
    PortBusy,
    #[error("socket is in the wrong state for this operation")]
    BadState,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("connection timed out")]
    TimedOut,
    #[error("broken pipe")]
    BrokenPipe,
    #[error("stream endpoint is closed")]
    Closed,
    #[error("end of stream")]
    EndOfStream,
    #[error("operation not supported by this stream")]
    NotSupported,
    #[error("buffer too small for one record")]
    BufferTooSmall,
}

pub type Result<T> = core::result::Result<T, Error>;
