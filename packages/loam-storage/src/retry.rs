use std::{future::Future, time::Duration};

use tracing::warn;

use crate::{Error, Result};

const MAX_BACKOFF_MS: u64 = 30_000;

/// `2^attempt * base`, capped. Attempt numbering starts at zero.
pub fn backoff_ms(attempt: u32, base_ms: u64) -> u64 {
	let exp = attempt.min(6);

	base_ms.saturating_mul(1 << exp).min(MAX_BACKOFF_MS)
}

/// Retry an idempotent request on transient failures with exponential
/// backoff. Non-transient errors surface immediately.
pub async fn with_retries<T, F, Fut>(
	operation: &'static str,
	max_retries: u32,
	base_ms: u64,
	mut f: F,
) -> Result<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let mut attempt = 0;

	loop {
		match f().await {
			Ok(value) => return Ok(value),
			Err(err) if err.is_transient() && attempt < max_retries => {
				let delay = backoff_ms(attempt, base_ms);

				warn!(operation, attempt, delay_ms = delay, error = %err, "Retrying transient failure.");
				tokio::time::sleep(Duration::from_millis(delay)).await;

				attempt += 1;
			},
			Err(err) => return Err(err),
		}
	}
}

/// Soft deadline for long-running backend calls. Expiry fails the call with
/// [`Error::Timeout`]; no partial result is surfaced.
pub async fn with_timeout<T, Fut>(
	operation: &'static str,
	timeout_ms: u64,
	fut: Fut,
) -> Result<T>
where
	Fut: Future<Output = Result<T>>,
{
	match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
		Ok(result) => result,
		Err(_) => Err(Error::Timeout { operation, timeout_ms }),
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicU32, Ordering};

	use crate::{
		Error,
		retry::{backoff_ms, with_retries, with_timeout},
	};

	#[test]
	fn backoff_doubles_and_caps() {
		assert_eq!(backoff_ms(0, 500), 500);
		assert_eq!(backoff_ms(1, 500), 1_000);
		assert_eq!(backoff_ms(2, 500), 2_000);
		assert_eq!(backoff_ms(16, 500), 30_000);
	}

	#[tokio::test]
	async fn non_transient_errors_do_not_retry() {
		let calls = AtomicU32::new(0);
		let result: crate::Result<()> = with_retries("test", 3, 1, || {
			calls.fetch_add(1, Ordering::SeqCst);

			async { Err(Error::InvalidArgument("bad".to_string())) }
		})
		.await;

		assert!(result.is_err());
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn transient_errors_retry_until_success() {
		let calls = AtomicU32::new(0);
		let result = with_retries("test", 3, 1, || {
			let attempt = calls.fetch_add(1, Ordering::SeqCst);

			async move {
				if attempt < 2 {
					Err(Error::Timeout { operation: "test", timeout_ms: 1 })
				} else {
					Ok(attempt)
				}
			}
		})
		.await;

		assert_eq!(result.unwrap(), 2);
	}

	#[tokio::test]
	async fn deadline_expiry_maps_to_timeout() {
		let result: crate::Result<()> = with_timeout("slow", 10, async {
			tokio::time::sleep(std::time::Duration::from_secs(5)).await;

			Ok(())
		})
		.await;

		assert!(matches!(result, Err(Error::Timeout { operation: "slow", .. })));
	}
}
