//! Offloading CPU-heavy work from async tasks.

/// Runs `f` on tokio's blocking pool and awaits its result.
///
/// Model construction, inference, index builds and file decoding all go
/// through here so they never stall async worker threads.
///
/// # Examples
///
/// ```ignore
/// let vector = run_blocking(move || encoder.embed_text(&text)).await?;
/// ```
pub async fn run_blocking<F, T, E>(f: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<String> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| E::from(format!("Task join failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexError;

    #[tokio::test]
    async fn test_returns_closure_result() {
        let ok: Result<u32, IndexError> = run_blocking(|| Ok(7)).await;
        assert_eq!(ok, Ok(7));

        let err: Result<u32, IndexError> = run_blocking(|| Err(IndexError::DuplicateKey(1))).await;
        assert_eq!(err, Err(IndexError::DuplicateKey(1)));
    }

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let result: Result<(), IndexError> = run_blocking(|| panic!("boom")).await;
        assert!(matches!(result, Err(IndexError::TaskFailed(msg)) if msg.contains("join")));
    }
}
