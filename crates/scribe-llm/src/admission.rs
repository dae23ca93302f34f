//! Admission control for in-flight asynchronous requests.
//!
//! A FIFO counting semaphore bounds how many requests are admitted at once.
//! Each released slot wakes exactly one waiter, and a slot is returned when
//! its [`AdmissionPermit`] is dropped, whatever the request's outcome.

use std::time::Duration;

use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{GatewayError, Result};

/// A held admission slot. Dropping it frees the slot.
pub type AdmissionPermit<'a> = SemaphorePermit<'a>;

/// Bounded admission for concurrently in-flight requests.
#[derive(Debug)]
pub struct Admission {
    semaphore: Semaphore,
    limit: usize,
    timeout: Option<Duration>,
}

impl Admission {
    /// Create admission control with `limit` slots.
    ///
    /// A limit of zero is raised to one. With `timeout` set, a caller that
    /// cannot be admitted within it fails with
    /// [`GatewayError::CapacityExceeded`]; otherwise it waits indefinitely.
    pub fn new(limit: usize, timeout: Option<Duration>) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Semaphore::new(limit),
            limit,
            timeout,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of requests currently holding a slot.
    pub fn in_flight(&self) -> usize {
        if self.semaphore.is_closed() {
            return 0;
        }
        self.limit.saturating_sub(self.semaphore.available_permits())
    }

    /// Wait for a free slot.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Cancelled`] if `cancel` fires while waiting.
    /// - [`GatewayError::CapacityExceeded`] if the configured timeout elapses.
    /// - [`GatewayError::Shutdown`] if admission has been closed.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<AdmissionPermit<'_>> {
        let acquired = match self.timeout {
            Some(timeout) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                    res = tokio::time::timeout(timeout, self.semaphore.acquire()) => {
                        res.map_err(|_| GatewayError::CapacityExceeded {
                            limit: self.limit,
                            waited_ms: timeout.as_millis() as u64,
                        })?
                    }
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                    res = self.semaphore.acquire() => res,
                }
            }
        };

        let permit = acquired.map_err(|_| GatewayError::Shutdown)?;
        debug!(
            in_flight = self.in_flight(),
            limit = self.limit,
            "request admitted"
        );
        Ok(permit)
    }

    /// Refuse all current and future waiters.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn permits_are_counted() {
        let admission = Admission::new(2, None);
        let cancel = CancellationToken::new();
        assert_eq!(admission.in_flight(), 0);

        let a = admission.acquire(&cancel).await.unwrap();
        assert_eq!(admission.in_flight(), 1);
        let b = admission.acquire(&cancel).await.unwrap();
        assert_eq!(admission.in_flight(), 2);

        drop(a);
        assert_eq!(admission.in_flight(), 1);
        drop(b);
        assert_eq!(admission.in_flight(), 0);
    }

    #[test]
    fn zero_limit_is_raised_to_one() {
        assert_eq!(Admission::new(0, None).limit(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reports_capacity_exceeded() {
        let admission = Admission::new(1, Some(Duration::from_secs(2)));
        let cancel = CancellationToken::new();
        let _held = admission.acquire(&cancel).await.unwrap();

        let err = admission.acquire(&cancel).await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::CapacityExceeded {
                limit: 1,
                waited_ms: 2000
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_is_admitted_when_slot_frees() {
        let admission = Arc::new(Admission::new(1, None));
        let cancel = CancellationToken::new();
        let held = admission.acquire(&cancel).await.unwrap();

        let waiter = {
            let admission = Arc::clone(&admission);
            tokio::spawn(async move {
                let cancel = CancellationToken::new();
                let _permit = admission.acquire(&cancel).await.unwrap();
            })
        };

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap();
        assert_eq!(admission.in_flight(), 0);
    }

    #[tokio::test]
    async fn cancel_while_waiting() {
        let admission = Admission::new(1, None);
        let cancel = CancellationToken::new();
        let _held = admission.acquire(&cancel).await.unwrap();

        let waiting = CancellationToken::new();
        waiting.cancel();
        let err = admission.acquire(&waiting).await.unwrap_err();
        assert!(matches!(err, GatewayError::Cancelled));
    }

    #[tokio::test]
    async fn closed_admission_refuses_waiters() {
        let admission = Admission::new(3, None);
        admission.close();
        assert!(admission.is_closed());
        let err = admission
            .acquire(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Shutdown));
    }
}
