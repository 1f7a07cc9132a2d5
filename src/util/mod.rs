use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Suspends the current task for one scheduling tick.
#[inline]
pub async fn next_tick(tick_interval: Duration) {
    tokio::time::sleep(tick_interval).await;
}

/// Locks the mutex, recovering the guard if another thread panicked while holding it.
/// None of the guarded state in this crate can be left half-written by a panic.
#[inline]
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clamps a provider reported progress into [0, 1], NaN counts as no progress.
#[inline]
pub fn clamp_progress(progress: f32) -> f32 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 1.0)
    }
}
