// Copyright 2020 Andreas Kurth
//
// SPDX-License-Identifier: (Apache-2.0 OR MIT)

//! Error Handling
//!
//! Verification errors are tagged by [`ErrorKind`] so callers can distinguish a policy rejection
//! (e.g. [`ErrorKind::RuleVerification`]) from a malformed-input rejection (e.g.
//! [`ErrorKind::Format`]) without parsing the message.

use std::fmt::{self, Display, Formatter};

pub type Result<T> = std::result::Result<T, Error>;

/// The kind of a verification failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A DISALLOW/REQUIRE/MODIFY/MATCH rule contract failed.
    RuleVerification,
    /// Layout signatures were insufficient or invalid.
    SignatureVerification,
    /// `now > layout.expires`.
    LayoutExpired,
    /// Insufficient valid authorized links for a step, or surviving links disagreed.
    ThresholdVerification,
    /// An inspection's exit status was non-integer or non-zero.
    BadReturnValue,
    /// A required link file is missing and the step's threshold cannot be met.
    LinkNotFound,
    /// A malformed document or an illegal argument (e.g. bad source-type).
    Format,
    /// Wraps an underlying I/O or subprocess failure.
    Io,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::RuleVerification => "RuleVerificationError",
            ErrorKind::SignatureVerification => "SignatureVerificationError",
            ErrorKind::LayoutExpired => "LayoutExpiredError",
            ErrorKind::ThresholdVerification => "ThresholdVerificationError",
            ErrorKind::BadReturnValue => "BadReturnValueError",
            ErrorKind::LinkNotFound => "LinkNotFoundError",
            ErrorKind::Format => "FormatError",
            ErrorKind::Io => "IoError",
        };
        write!(f, "{}", s)
    }
}

/// A verification or loading error, carrying a [`ErrorKind`] and a human-readable message.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Error {
        Error {
            kind,
            message: message.into(),
        }
    }

    /// Chains `cause` onto `message`, defaulting to [`ErrorKind::Io`] for arbitrary I/O-ish
    /// causes that don't warrant a more specific kind.
    pub fn chain<S: Into<String>, C: Display>(message: S, cause: C) -> Error {
        Error::chain_kind(ErrorKind::Io, message, cause)
    }

    pub fn chain_kind<S: Into<String>, C: Display>(kind: ErrorKind, message: S, cause: C) -> Error {
        Error::new(kind, format!("{}: {}", message.into(), cause))
    }

    /// Shorthand for constructing an `Err(Error::new(ErrorKind::Format, message))`.
    pub fn result<T, S: Into<String>>(message: S) -> Result<T> {
        Err(Error::new(ErrorKind::Format, message))
    }

    pub fn result_kind<T, S: Into<String>>(kind: ErrorKind, message: S) -> Result<T> {
        Err(Error::new(kind, message))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn rule_verification<S: Into<String>>(message: S) -> Error {
        Error::new(ErrorKind::RuleVerification, message)
    }

    pub fn signature_verification<S: Into<String>>(message: S) -> Error {
        Error::new(ErrorKind::SignatureVerification, message)
    }

    pub fn layout_expired<S: Into<String>>(message: S) -> Error {
        Error::new(ErrorKind::LayoutExpired, message)
    }

    pub fn threshold_verification<S: Into<String>>(message: S) -> Error {
        Error::new(ErrorKind::ThresholdVerification, message)
    }

    pub fn bad_return_value<S: Into<String>>(message: S) -> Error {
        Error::new(ErrorKind::BadReturnValue, message)
    }

    pub fn link_not_found<S: Into<String>>(message: S) -> Error {
        Error::new(ErrorKind::LinkNotFound, message)
    }

    pub fn format<S: Into<String>>(message: S) -> Error {
        Error::new(ErrorKind::Format, message)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(cause: std::io::Error) -> Error {
        Error::chain("I/O error", cause)
    }
}
