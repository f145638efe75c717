//! Outcome of an asynchronous computation.
//!
//! An [`Outcome`] is either a success carrying a value or a failure carrying
//! an [`Error`]. Outcomes are plain values: they compare by value and clone
//! cheaply when the payload does.

use crate::error::Error;
use core::fmt;
use std::any::Any;

/// The result of a computation once its promise is resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The computation produced a value.
    Success(T),
    /// The computation failed.
    Failure(Error),
}

impl<T> Outcome<T> {
    /// Creates a successful outcome.
    #[inline]
    pub const fn success(value: T) -> Self {
        Self::Success(value)
    }

    /// Creates a failed outcome.
    #[inline]
    pub const fn failure(error: Error) -> Self {
        Self::Failure(error)
    }

    /// Creates a failed outcome from a captured panic payload.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        Self::Failure(Error::panicked(payload))
    }

    /// Returns true if this is a success.
    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns true if this is a failure.
    #[inline]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns the success value by reference, if any.
    pub const fn as_success(&self) -> Option<&T> {
        match self {
            Self::Success(value) => Some(value),
            Self::Failure(_) => None,
        }
    }

    /// Returns the failure by reference, if any.
    pub const fn as_failure(&self) -> Option<&Error> {
        match self {
            Self::Success(_) => None,
            Self::Failure(error) => Some(error),
        }
    }

    /// Extracts the success value, re-raising the failure as-is.
    pub fn force(self) -> Result<T, Error> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(error) => Err(error),
        }
    }

    /// Extracts the success value, wrapping a failure with the operation label.
    pub fn value(self, label: &str) -> Result<T, Error> {
        self.force().map_err(|error| error.labeled(label))
    }

    /// Maps the success value.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Self::Success(value) => Outcome::Success(f(value)),
            Self::Failure(error) => Outcome::Failure(error),
        }
    }

    /// Maps the failure, leaving a success untouched.
    #[must_use]
    pub fn map_err<F: FnOnce(Error) -> Error>(self, f: F) -> Self {
        match self {
            Self::Success(value) => Self::Success(value),
            Self::Failure(error) => Self::Failure(f(error)),
        }
    }
}

impl<T> From<Result<T, Error>> for Outcome<T> {
    fn from(result: Result<T, Error>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(error) => Self::Failure(error),
        }
    }
}

impl<T> From<Outcome<T>> for Result<T, Error> {
    fn from(outcome: Outcome<T>) -> Self {
        outcome.force()
    }
}

impl<T: fmt::Display> fmt::Display for Outcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(value) => write!(f, "Success({value})"),
            Self::Failure(error) => write!(f, "Failure({error})"),
        }
    }
}
