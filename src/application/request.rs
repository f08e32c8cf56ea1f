//! Request - a one-shot query/response handle with a deadline.
//!
//! Grounded on `original_source/Database/request.hpp`'s `Request` class:
//! a single-shot handle that marshals a query result back onto the
//! originating thread and then destroys itself. The "signal results on
//! the originating thread" idea becomes a `tokio::sync::oneshot` paired
//! with `tokio::time::timeout`; the closed `ErrorResult` enum is carried
//! over verbatim.

use std::time::Duration;

use tokio::sync::oneshot;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Closed error set from `request.hpp`'s `ErrorResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestError {
    Timeout,
    DbFailed,
    NotFound,
    Partial,
    Invalid,
    Immediate,
}

/// Creates a matched (waiter, responder) pair. The waiter awaits the
/// result with `deadline`; the responder fulfils or fails it exactly
/// once. Dropping the responder without replying is treated as
/// `DbFailed`, mirroring the original's `notifyFailed` fallback.
pub fn channel<T>(deadline: Duration) -> (RequestWaiter<T>, RequestResponder<T>) {
    let (tx, rx) = oneshot::channel();
    (RequestWaiter { rx, deadline }, RequestResponder { tx: Some(tx) })
}

pub struct RequestWaiter<T> {
    rx: oneshot::Receiver<Result<T, RequestError>>,
    deadline: Duration,
}

impl<T> RequestWaiter<T> {
    pub async fn wait(self) -> Result<T, RequestError> {
        match tokio::time::timeout(self.deadline, self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RequestError::DbFailed),
            Err(_) => Err(RequestError::Timeout),
        }
    }
}

pub struct RequestResponder<T> {
    tx: Option<oneshot::Sender<Result<T, RequestError>>>,
}

impl<T> RequestResponder<T> {
    pub fn success(mut self, value: T) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Ok(value));
        }
    }

    pub fn failed(mut self, err: RequestError) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_success() {
        let (waiter, responder) = channel::<i32>(Duration::from_millis(100));
        responder.success(42);
        assert_eq!(waiter.wait().await, Ok(42));
    }

    #[tokio::test]
    async fn times_out_when_nobody_replies() {
        let (waiter, responder) = channel::<i32>(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(responder);
        assert_eq!(waiter.wait().await, Err(RequestError::Timeout));
    }

    #[tokio::test]
    async fn reports_db_failure_on_drop_before_deadline() {
        let (waiter, responder) = channel::<i32>(Duration::from_millis(200));
        drop(responder);
        assert_eq!(waiter.wait().await, Err(RequestError::DbFailed));
    }
}
