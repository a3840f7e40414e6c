//! Polling helpers for asynchronous tests.

use std::future::Future;
use std::time::Duration;

/// Poll `check` every `interval` until it yields `Some`, at most `attempts`
/// times.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use test_utils::poll_until;
///
/// # tokio_test::block_on(async {
/// let value = poll_until(3, Duration::from_millis(1), || async { Some(7) }).await;
/// assert_eq!(value, Some(7));
/// # });
/// ```
pub async fn poll_until<T, F, Fut>(attempts: usize, interval: Duration, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for attempt in 0..attempts {
        if let Some(value) = check().await {
            return Some(value);
        }
        if attempt + 1 < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_poll_until_gives_up() {
        let calls = Cell::new(0);
        let value: Option<u8> = tokio_test::block_on(poll_until(4, Duration::from_millis(1), || {
            calls.set(calls.get() + 1);
            async { None }
        }));
        assert_eq!(value, None);
        assert_eq!(calls.get(), 4);
    }

    #[tokio::test]
    async fn test_poll_until_returns_first_hit() {
        let calls = Cell::new(0);
        let value = poll_until(10, Duration::from_millis(1), || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move { (n == 3).then_some(n) }
        })
        .await;
        assert_eq!(value, Some(3));
    }
}
