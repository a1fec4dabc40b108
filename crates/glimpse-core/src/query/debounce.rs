//! Debouncing of rapid text input.
//!
//! Each text submission waits out a quiet window before it runs. A newer
//! submission on the same channel cancels the older one's token, which ends
//! its wait early, so a burst of keystrokes executes only the last value.

use super::cancel::{CancellationToken, Cancelled};
use std::time::Duration;

/// Sleeps for `window`, or returns `Cancelled` as soon as `token` is cancelled.
pub async fn debounce(window: Duration, token: &CancellationToken) -> Result<(), Cancelled> {
    if window.is_zero() {
        return token.check();
    }
    token.run_until_cancelled(tokio::time::sleep(window)).await
}
