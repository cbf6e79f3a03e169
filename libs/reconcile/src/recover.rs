//! Selective recovery from one anticipated error kind.

use std::future::Future;

/// Result of splitting a fallible value by error kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T, K, E> {
    /// The operation succeeded.
    Ok(T),

    /// The operation failed with the anticipated kind.
    Caught(K),

    /// The operation failed with anything else.
    Other(E),
}

impl<T, K, E> Outcome<T, K, E> {
    /// Returns true if the anticipated kind was caught.
    pub fn is_caught(&self) -> bool {
        matches!(self, Self::Caught(_))
    }
}

/// Split `result` using `select`.
///
/// `select` returns `Ok(kind)` when the error is the anticipated kind and
/// hands the error back as `Err` otherwise.
pub fn classify<T, E, K, S>(result: Result<T, E>, select: S) -> Outcome<T, K, E>
where
    S: FnOnce(E) -> Result<K, E>,
{
    match result {
        Ok(value) => Outcome::Ok(value),
        Err(err) => match select(err) {
            Ok(kind) => Outcome::Caught(kind),
            Err(other) => Outcome::Other(other),
        },
    }
}

/// Await `fut`; on an anticipated failure run `recover` in its place.
///
/// Errors `select` does not claim are returned unchanged so an outer
/// handler sees them exactly as raised.
pub async fn catch_kind<T, E, K, F, S, R, RF>(fut: F, select: S, recover: R) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    S: FnOnce(E) -> Result<K, E>,
    R: FnOnce(K) -> RF,
    RF: Future<Output = Result<T, E>>,
{
    match classify(fut.await, select) {
        Outcome::Ok(value) => Ok(value),
        Outcome::Caught(kind) => recover(kind).await,
        Outcome::Other(err) => Err(err),
    }
}
