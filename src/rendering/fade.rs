use std::future::Future;

/// Full screen fade that hides the scene swap. Both directions resolve once the animation is done.
pub trait Fader: Send + Sync + 'static {
    /// Fades to opaque, covering whatever is on screen. `immediate` skips the animation.
    fn fade_in(&self, immediate: bool) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Fades back to transparent, revealing the scene underneath.
    fn fade_out(&self) -> impl Future<Output = anyhow::Result<()>> + Send;
}
