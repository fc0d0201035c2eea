// Copyright 2025 Cloudflare, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![warn(clippy::all)]
//! The error type shared by the larder crates.
//!
//! Errors are passed around boxed ([BError]). Each error carries an [ErrorType], an optional
//! context string and an optional cause, so a failure deep inside a capture can be logged with
//! its whole chain without the caller having to know about every underlying error type.

pub use std::error::Error as ErrorTrait;
use std::borrow::Cow;
use std::fmt;
use std::result::Result as StdResult;

/// Context string attached to an [Error]. Static strings are not allocated.
pub type ErrorContext = Cow<'static, str>;

/// The boxed [Error], the desired way to pass [Error]
pub type BError = Box<Error>;
/// Syntax sugar for `std::Result<T, BError>`
pub type Result<T, E = BError> = StdResult<T, E>;

/// The struct that represents an error
#[derive(Debug)]
pub struct Error {
    /// the type of error
    pub etype: ErrorType,
    /// chain to the cause of this error
    pub cause: Option<Box<(dyn ErrorTrait + Send + Sync)>>,
    /// an arbitrary string that explains the context when the error happens
    pub context: Option<ErrorContext>,
}

/// Predefined type of errors
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorType {
    /// A Cache-Control directive could not be parsed in strict mode
    InvalidDirective,
    /// An externally supplied cache key string could not be decoded
    InvalidCacheKey,
    /// Mirroring a body chunk into the capture buffer failed
    CaptureWriteError,
    /// The captured body grew past the configured maximum
    SizeLimitExceeded,
    /// The frame buffer was already sealed
    StreamClosed,
    /// Frames were requested before the frame buffer was sealed
    BufferNotSealed,
    /// The configuration did not pass validation
    InvalidConfig,
    /// Reading configuration input failed
    ReadError,
    // other errors
    InternalError,
}

impl ErrorType {
    /// for displaying the error type
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::InvalidDirective => "InvalidDirective",
            ErrorType::InvalidCacheKey => "InvalidCacheKey",
            ErrorType::CaptureWriteError => "CaptureWriteError",
            ErrorType::SizeLimitExceeded => "SizeLimitExceeded",
            ErrorType::StreamClosed => "StreamClosed",
            ErrorType::BufferNotSealed => "BufferNotSealed",
            ErrorType::InvalidConfig => "InvalidConfig",
            ErrorType::ReadError => "ReadError",
            ErrorType::InternalError => "InternalError",
        }
    }
}

impl Error {
    /// Simply create the error. See other functions that provide less verbose interfaces.
    #[inline]
    pub fn create(
        etype: ErrorType,
        context: Option<ErrorContext>,
        cause: Option<Box<dyn ErrorTrait + Send + Sync>>,
    ) -> BError {
        Box::new(Error {
            etype,
            cause,
            context,
        })
    }

    /// Create an error with the given type, a context string and the causing error.
    /// ```
    /// use larder_error::{Error, ErrorType, Result};
    ///
    /// fn read_conf() -> Result<String> {
    ///     std::fs::read_to_string("/nonexistent/larder.yaml")
    ///         .map_err(|e| Error::because(ErrorType::ReadError, "could not read conf", e))
    /// }
    /// assert!(read_conf().is_err());
    /// ```
    #[inline]
    pub fn because<S: Into<ErrorContext>, E: Into<Box<dyn ErrorTrait + Send + Sync>>>(
        e: ErrorType,
        context: S,
        cause: E,
    ) -> BError {
        Self::create(e, Some(context.into()), Some(cause.into()))
    }

    /// Create an error with context but no direct causing error
    #[inline]
    pub fn explain<S: Into<ErrorContext>>(e: ErrorType, context: S) -> BError {
        Self::create(e, Some(context.into()), None)
    }

    /// Short for Err(Self::explain)
    #[inline]
    pub fn e_explain<T, S: Into<ErrorContext>>(e: ErrorType, context: S) -> Result<T> {
        Err(Self::explain(e, context))
    }

    pub fn etype(&self) -> &ErrorType {
        &self.etype
    }

    /// Create a new error from self, with the same type and put self as the cause
    pub fn more_context<T: Into<ErrorContext>>(self: BError, context: T) -> BError {
        Self::because(self.etype.clone(), context, self)
    }

    // Display error but skip the duplicate type from the error in previous hop
    fn chain_display(&self, previous: Option<&Error>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if previous.map(|p| p.etype != self.etype).unwrap_or(true) {
            write!(f, "{}", self.etype.as_str())?
        }
        if let Some(c) = self.context.as_ref() {
            write!(f, " context: {c}")?;
        }
        if let Some(c) = self.cause.as_ref() {
            if let Some(e) = c.downcast_ref::<BError>() {
                write!(f, " cause: ")?;
                e.chain_display(Some(self), f)
            } else {
                write!(f, " cause: {c}")
            }
        } else {
            Ok(())
        }
    }

    /// Return the ErrorType of the root Error
    pub fn root_etype(&self) -> &ErrorType {
        self.cause.as_ref().map_or(&self.etype, |c| {
            c.downcast_ref::<BError>()
                .map_or(&self.etype, |e| e.root_etype())
        })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.chain_display(None, f)
    }
}

impl ErrorTrait for Error {}

/// Helper trait to add more context to a given error
pub trait Context<T> {
    /// Wrap the `Err(E)` in [Result] with more context, the existing E will be the cause.
    fn err_context<C: Into<ErrorContext>, F: FnOnce() -> C>(self, context: F) -> Result<T, BError>;
}

impl<T> Context<T> for Result<T, BError> {
    fn err_context<C: Into<ErrorContext>, F: FnOnce() -> C>(self, context: F) -> Result<T, BError> {
        self.map_err(|e| e.more_context(context()))
    }
}

/// Helper trait to chain errors with context
pub trait OrErr<T, E> {
    /// Wrap the E in [Result] with new [ErrorType] and context, the existing E will be the cause.
    fn or_err(self, et: ErrorType, context: &'static str) -> Result<T, BError>
    where
        E: Into<Box<dyn ErrorTrait + Send + Sync>>;

    /// Similar to or_err(), but takes a closure, which is useful for constructing String.
    fn or_err_with<C: Into<ErrorContext>, F: FnOnce() -> C>(
        self,
        et: ErrorType,
        context: F,
    ) -> Result<T, BError>
    where
        E: Into<Box<dyn ErrorTrait + Send + Sync>>;

    /// Replace the E in [Result] with a new [Error] generated from the current error
    fn explain_err<C: Into<ErrorContext>, F: FnOnce(E) -> C>(
        self,
        et: ErrorType,
        context: F,
    ) -> Result<T, BError>;
}

impl<T, E> OrErr<T, E> for Result<T, E> {
    fn or_err(self, et: ErrorType, context: &'static str) -> Result<T, BError>
    where
        E: Into<Box<dyn ErrorTrait + Send + Sync>>,
    {
        self.map_err(|e| Error::because(et, context, e))
    }

    fn or_err_with<C: Into<ErrorContext>, F: FnOnce() -> C>(
        self,
        et: ErrorType,
        context: F,
    ) -> Result<T, BError>
    where
        E: Into<Box<dyn ErrorTrait + Send + Sync>>,
    {
        self.map_err(|e| Error::because(et, context(), e))
    }

    fn explain_err<C: Into<ErrorContext>, F: FnOnce(E) -> C>(
        self,
        et: ErrorType,
        exp: F,
    ) -> Result<T, BError> {
        self.map_err(|e| Error::explain(et, exp(e)))
    }
}

/// Helper trait to convert an [Option] to an [Error] with context.
pub trait OkOrErr<T> {
    fn or_err(self, et: ErrorType, context: &'static str) -> Result<T, BError>;

    fn or_err_with<C: Into<ErrorContext>, F: FnOnce() -> C>(
        self,
        et: ErrorType,
        context: F,
    ) -> Result<T, BError>;
}

impl<T> OkOrErr<T> for Option<T> {
    /// Convert the [Option] to a new [Error] with [ErrorType] and context if None, Ok otherwise.
    fn or_err(self, et: ErrorType, context: &'static str) -> Result<T, BError> {
        self.ok_or_else(|| Error::explain(et, context))
    }

    fn or_err_with<C: Into<ErrorContext>, F: FnOnce() -> C>(
        self,
        et: ErrorType,
        context: F,
    ) -> Result<T, BError> {
        self.ok_or_else(|| Error::explain(et, context()))
    }
}
