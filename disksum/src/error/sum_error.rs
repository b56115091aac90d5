/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::{
    fmt::{Debug, Display},
    io,
    num::TryFromIntError,
};

/// Convenience alias for a `Result<T, SumError>`.
pub type SumResult<T> = Result<T, SumError>;

/// Common error type shared through disksum.
///
/// The runtime origin of an error is disambiguated with [`SumError::kind`];
/// the payload carries the source chain plus the file:line of every
/// construction and propagation site.
///
/// # Backtraces
///
/// Backtraces are captured on first construction when `RUST_BACKTRACE=1` is
/// set in the environment.
#[derive(Debug)]
pub struct SumError {
    kind: SumErrorKind,
    error: anyhow::Error,
}

impl SumError {
    /// Construct a new `SumError` encapsulating `err`.
    ///
    /// # Attributes
    ///
    /// - `track_caller`: the error is embedded inside a `Located` struct
    ///   recording the file and line of the caller.
    ///
    /// - `inline(never)`: keeps error construction out of the happy path.
    #[track_caller]
    #[inline(never)]
    pub fn new<E>(kind: SumErrorKind, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            kind,
            error: anyhow::Error::new(Located::new(err)),
        }
    }

    /// Construct a new `SumError` from a displayable message.
    #[track_caller]
    #[inline(never)]
    pub fn message<D>(kind: SumErrorKind, display: D) -> Self
    where
        D: Display + Debug + Send + Sync + 'static,
    {
        Self {
            kind,
            error: anyhow::Error::msg(Located::new(display)),
        }
    }

    /// Attach context to `Self` and return a new error.
    #[track_caller]
    #[inline(never)]
    pub fn context<C>(self, context: C) -> Self
    where
        C: Display + Debug + Send + Sync + 'static,
    {
        Self {
            kind: self.kind,
            error: self.error.context(Located::new(context)),
        }
    }

    /// Return the kind of the originally constructed error.
    pub fn kind(&self) -> SumErrorKind {
        self.kind
    }

    /// Configuration rejected before any resource acquisition.
    #[track_caller]
    #[inline(never)]
    pub fn config<D: Display>(err: D) -> Self {
        Self::message(SumErrorKind::ConfigError, err.to_string())
    }

    /// Device open or geometry discovery failure.
    #[track_caller]
    #[inline(never)]
    pub fn device<D: Display>(err: D) -> Self {
        Self::message(SumErrorKind::DeviceError, err.to_string())
    }

    /// Output file create/size/map failure.
    #[track_caller]
    #[inline(never)]
    pub fn output_map<D: Display>(err: D) -> Self {
        Self::message(SumErrorKind::OutputMapError, err.to_string())
    }

    /// I/O failure reported by the kernel, fatal by policy: a failed read of
    /// a raw device block reflects a structural problem, and masking it would
    /// silently corrupt the manifest.
    #[track_caller]
    #[inline(never)]
    pub fn io(err: io::Error) -> Self {
        Self::new(SumErrorKind::IOError, err)
    }

    /// io_uring submission-queue push failure.
    #[track_caller]
    #[inline(never)]
    pub fn push<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::new(SumErrorKind::PushError, err)
    }

    /// A lock was poisoned by a panicking worker.
    #[track_caller]
    #[inline(never)]
    pub fn lock_poison<D: Display>(err: D) -> Self {
        Self::message(SumErrorKind::LockPoisonError, err.to_string())
    }

    /// Worker thread creation or join failure.
    #[track_caller]
    #[inline(never)]
    pub fn thread<D: Display>(err: D) -> Self {
        Self::message(SumErrorKind::ThreadError, err.to_string())
    }
}

impl Display for SumError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        // Debug-format the anyhow payload to include the source chain.
        write!(formatter, "SumError: {:?}\n\n{:?}", self.kind, self.error)
    }
}

impl std::error::Error for SumError {
    // `source` is intentionally not implemented: the whole chain is printed
    // by the `Display` implementation.
}

impl From<io::Error> for SumError {
    #[track_caller]
    fn from(err: io::Error) -> Self {
        SumError::io(err)
    }
}

impl From<TryFromIntError> for SumError {
    #[track_caller]
    fn from(err: TryFromIntError) -> Self {
        SumError::new(SumErrorKind::TryFromIntError, err)
    }
}

/// disksum error kinds used to tag a returned error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SumErrorKind {
    /// Missing/contradictory run parameters, rejected before any resource
    /// is acquired.
    ConfigError,

    /// Device open, size, or sector-geometry failure.
    DeviceError,

    /// Output manifest create/truncate/map failure.
    OutputMapError,

    /// Read submission or completion failure reported by the kernel.
    IOError,

    /// io_uring error when pushing an entry into the submission ring.
    PushError,

    /// Integer conversion error.
    TryFromIntError,

    /// PoisonError from a lock whose holder panicked.
    LockPoisonError,

    /// Worker thread spawn or join failure.
    ThreadError,
}

/// An internal wrapper for error types that also tracks the file and line
/// where the error was constructed or context was attached.
#[derive(Debug)]
struct Located<T>
where
    T: Debug,
{
    err: T,
    location: &'static std::panic::Location<'static>,
}

impl<T> Located<T>
where
    T: Debug,
{
    #[track_caller]
    fn new(err: T) -> Self {
        Self {
            err,
            location: std::panic::Location::caller(),
        }
    }
}

impl<T> Display for Located<T>
where
    T: Display + Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "{} -- ({}:{})",
            self.err,
            self.location.file(),
            self.location.line()
        )
    }
}

impl<T> std::error::Error for Located<T>
where
    T: std::error::Error + Debug,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.err.source()
    }
}

/// Add context to a returned error that will be included in the source chain.
pub trait ErrorContext<T> {
    /// Attach the provided context to the error part of the result.
    fn context<C>(self, context: C) -> Result<T, SumError>
    where
        C: Display + Debug + Send + Sync + 'static;

    /// Attach the provided context to the error part of the result.
    ///
    /// The function `f` is only evaluated if `self` is an `Err`.
    fn with_context<F, C>(self, f: F) -> Result<T, SumError>
    where
        C: Display + Debug + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    SumError: From<E>,
{
    #[track_caller]
    fn context<C>(self, context: C) -> Result<T, SumError>
    where
        C: Display + Debug + Send + Sync + 'static,
    {
        match self {
            Ok(value) => Ok(value),
            Err(error) => Err(SumError::from(error).context(context)),
        }
    }

    #[track_caller]
    fn with_context<F, C>(self, f: F) -> Result<T, SumError>
    where
        C: Display + Debug + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        match self {
            Ok(value) => Ok(value),
            Err(error) => Err(SumError::from(error).context(f())),
        }
    }
}

#[cfg(test)]
mod sum_result_test {
    use super::*;

    #[test]
    fn sum_err_is_send_and_sync() {
        fn assert_send_and_sync<T: Send + Sync>() {}
        assert_send_and_sync::<SumError>();
    }

    // Keep `Results` within 16-bytes so they can be returned in registers.
    #[test]
    fn check_struct_size() {
        assert_eq!(std::mem::size_of::<SumError>(), 16);
        assert_eq!(std::mem::size_of::<Option<SumError>>(), 16);
        assert_eq!(std::mem::size_of::<Result<u64, SumError>>(), 16);
    }

    #[test]
    fn io_error_conversion() {
        let io_err = io::Error::other("bad sector");
        let expected = io_err.to_string();
        let err: SumError = io_err.into();
        assert_eq!(err.kind(), SumErrorKind::IOError);
        assert!(err.to_string().contains(&expected));
    }

    #[test]
    fn try_from_int_conversion() {
        let err: SumError = u32::try_from(u64::MAX).unwrap_err().into();
        assert_eq!(err.kind(), SumErrorKind::TryFromIntError);
    }

    #[test]
    fn context_chaining() {
        fn fails() -> SumResult<()> {
            Err(SumError::config("alignment must be non-zero"))
        }

        let err = fails().context("validating run configuration").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("alignment must be non-zero"), "got: {message}");
        assert!(message.contains("validating run configuration"), "got: {message}");
        assert_eq!(err.kind(), SumErrorKind::ConfigError);
    }

    #[test]
    fn with_context_lazy() {
        let ok: Result<u64, io::Error> = Ok(7);
        let fine = ok.with_context(|| -> &'static str { panic!("must not be evaluated") });
        assert_eq!(fine.unwrap(), 7);

        let bad: Result<u64, io::Error> = Err(io::Error::other("boom"));
        let err = bad.with_context(|| "opening device").unwrap_err();
        assert!(err.to_string().contains("opening device"));
    }

    #[test]
    fn located_formatting_includes_file_and_line() {
        let line = line!() + 1;
        let err = SumError::config("bad");
        let message = err.to_string();
        assert!(
            message.contains(&format!("({}:{})", file!(), line)),
            "got: {message}"
        );
    }

    #[test]
    fn direct_constructors_tag_kinds() {
        assert_eq!(SumError::device("gone").kind(), SumErrorKind::DeviceError);
        assert_eq!(SumError::output_map("full").kind(), SumErrorKind::OutputMapError);
        assert_eq!(SumError::lock_poison("held").kind(), SumErrorKind::LockPoisonError);
        assert_eq!(SumError::thread("spawn").kind(), SumErrorKind::ThreadError);
    }
}
