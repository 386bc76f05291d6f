//! The result algebra the flows are written in.
//!
//! Every flow transition resolves to a [`StepResult`]: the outer `Result`
//! carries the fatal [`RequestError`] channel, the inner one the expected
//! flow-level outcome (a next state on success, a retry state or typed
//! refusal on failure). [`FutResult`] wraps the pending computation as a
//! first-class value so transitions can be chained without awaiting at every
//! step. The synchronous half of the algebra is `std::result::Result`
//! itself; [`ResultExt`] and friends fill in the few combinators std does
//! not already provide.

use crate::error::RequestError;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// The resolved outcome of one flow step.
pub type StepResult<T, E> = Result<Result<T, E>, RequestError>;

type BoxFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A pending flow step.
///
/// Awaiting yields a [`StepResult`]. The value is inert until polled, and
/// the resolved variant must be observed: states and tokens ride inside
/// both the `Ok` and `Err` sides.
#[must_use = "a FutResult does nothing until awaited, and its outcome carries live flow state"]
pub struct FutResult<'a, T, E> {
    fut: BoxFut<'a, StepResult<T, E>>,
}

impl<'a, T, E> FutResult<'a, T, E>
where
    T: Send + 'a,
    E: Send + 'a,
{
    /// Wrap a pending computation.
    pub fn new<F>(fut: F) -> Self
    where
        F: Future<Output = StepResult<T, E>> + Send + 'a,
    {
        FutResult { fut: Box::pin(fut) }
    }

    /// An already-successful step.
    pub fn ok(value: T) -> Self {
        FutResult::new(std::future::ready(Ok(Ok(value))))
    }

    /// An already-failed step (flow plane).
    pub fn err(error: E) -> Self {
        FutResult::new(std::future::ready(Ok(Err(error))))
    }

    /// An already-aborted step (request plane).
    pub fn fail(error: RequestError) -> Self {
        FutResult::new(std::future::ready(Err(error)))
    }

    /// Apply `f` to the success value.
    pub fn map<U, F>(self, f: F) -> FutResult<'a, U, E>
    where
        U: Send + 'a,
        F: FnOnce(T) -> U + Send + 'a,
    {
        FutResult::new(async move { Ok(self.fut.await?.map(f)) })
    }

    /// Apply `f` to the flow-level error value.
    pub fn map_err<G, F>(self, f: F) -> FutResult<'a, T, G>
    where
        G: Send + 'a,
        F: FnOnce(E) -> G + Send + 'a,
    {
        FutResult::new(async move { Ok(self.fut.await?.map_err(f)) })
    }

    /// Chain a synchronous fallible continuation.
    pub fn and_then<U, F>(self, f: F) -> FutResult<'a, U, E>
    where
        U: Send + 'a,
        F: FnOnce(T) -> Result<U, E> + Send + 'a,
    {
        FutResult::new(async move { Ok(self.fut.await?.and_then(f)) })
    }

    /// Chain another step, flattening the inner asynchrony. A request-plane
    /// error short-circuits without running `f`.
    pub fn and_then_fut<U, F>(self, f: F) -> FutResult<'a, U, E>
    where
        U: Send + 'a,
        F: FnOnce(T) -> FutResult<'a, U, E> + Send + 'a,
    {
        FutResult::new(async move {
            match self.fut.await? {
                Ok(value) => f(value).await,
                Err(error) => Ok(Err(error)),
            }
        })
    }

    /// Apply an asynchronous function to the success value.
    pub fn map_fut<U, F, Fut>(self, f: F) -> FutResult<'a, U, E>
    where
        U: Send + 'a,
        F: FnOnce(T) -> Fut + Send + 'a,
        Fut: Future<Output = U> + Send + 'a,
    {
        FutResult::new(async move {
            match self.fut.await? {
                Ok(value) => Ok(Ok(f(value).await)),
                Err(error) => Ok(Err(error)),
            }
        })
    }

    /// Apply an asynchronous function to the flow-level error value.
    pub fn map_err_fut<G, F, Fut>(self, f: F) -> FutResult<'a, T, G>
    where
        G: Send + 'a,
        F: FnOnce(E) -> Fut + Send + 'a,
        Fut: Future<Output = G> + Send + 'a,
    {
        FutResult::new(async move {
            match self.fut.await? {
                Ok(value) => Ok(Ok(value)),
                Err(error) => Ok(Err(f(error).await)),
            }
        })
    }

    /// Observe the success value without consuming it.
    pub fn inspect<F>(self, f: F) -> Self
    where
        F: FnOnce(&T) + Send + 'a,
    {
        FutResult::new(async move { Ok(self.fut.await?.inspect(f)) })
    }

    /// Observe the flow-level error without consuming it.
    pub fn inspect_err<F>(self, f: F) -> Self
    where
        F: FnOnce(&E) + Send + 'a,
    {
        FutResult::new(async move { Ok(self.fut.await?.inspect_err(f)) })
    }
}

impl<'a, T, E> Future for FutResult<'a, T, E> {
    type Output = StepResult<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().fut.as_mut().poll(cx)
    }
}

impl<T, E> fmt::Debug for FutResult<'_, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FutResult(..)")
    }
}

/// Combinators std's `Result` is missing.
pub trait ResultExt<T, E> {
    /// Like `expect`, with the message computed from the error.
    fn expect_with<F>(self, f: F) -> T
    where
        F: FnOnce(&E) -> String;

    /// Replace both sides with constants, preserving the variant.
    fn replace<U, G>(self, ok: U, err: G) -> Result<U, G>;
}

impl<T, E> ResultExt<T, E> for Result<T, E> {
    fn expect_with<F>(self, f: F) -> T
    where
        F: FnOnce(&E) -> String,
    {
        match self {
            Ok(value) => value,
            Err(error) => panic!("{}", f(&error)),
        }
    }

    fn replace<U, G>(self, ok: U, err: G) -> Result<U, G> {
        match self {
            Ok(_) => Ok(ok),
            Err(_) => Err(err),
        }
    }
}

/// Collapse a `Result` whose sides carry the same type.
pub trait Collapse<T> {
    /// The value, whichever side it was on.
    fn collapse(self) -> T;
}

impl<T> Collapse<T> for Result<T, T> {
    fn collapse(self) -> T {
        match self {
            Ok(value) | Err(value) => value,
        }
    }
}

/// Total extraction from a `Result` that cannot fail.
pub trait VoidErr<T> {
    /// The success value; no panic path exists.
    fn void_err(self) -> T;
}

impl<T> VoidErr<T> for Result<T, Infallible> {
    fn void_err(self) -> T {
        match self {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }
}
