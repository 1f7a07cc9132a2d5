use crate::io::common::loader::{HandleReleaser, LoadHandle};
use crate::util::lock;
use log::{error, info, warn};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Anything that has to be cleaned up explicitly when its owner goes away.
pub trait Disposable: Send {
    fn dispose(&mut self) -> anyhow::Result<()>;
}

/// Background tasks of an owner are aborted together with it.
impl<T: Send + 'static> Disposable for JoinHandle<T> {
    fn dispose(&mut self) -> anyhow::Result<()> {
        self.abort();
        Ok(())
    }
}

#[derive(Default)]
struct RegistryState {
    disposables: Vec<Box<dyn Disposable>>,
    handles: Vec<LoadHandle>,
    torn_down: bool,
}

/// Keeps track of everything a long-lived object opened and releases all of it exactly once,
/// either on [`ResourceRegistry::teardown`] or when the registry is dropped.
pub struct ResourceRegistry {
    owner: &'static str,
    releaser: Arc<dyn HandleReleaser>,
    state: Mutex<RegistryState>,
}

impl ResourceRegistry {
    /// `owner` is only used for diagnostics, usually `std::any::type_name::<Self>()` of the owner.
    pub fn new(owner: &'static str, releaser: Arc<dyn HandleReleaser>) -> Self {
        Self {
            owner,
            releaser,
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Returns false if the handle is already tracked, in which case nothing changes.
    pub fn register_handle(&self, handle: LoadHandle) -> bool {
        {
            let mut state = lock(&self.state);
            if !state.torn_down {
                if state.handles.contains(&handle) {
                    warn!("{}: handle {} is already registered for release", self.owner, handle);
                    return false;
                }

                state.handles.push(handle);
                return true;
            }
        }

        warn!("{}: handle {} registered after teardown, releasing it right away", self.owner, handle);
        self.release_now(handle);
        true
    }

    /// Releases a single handle ahead of the teardown. Returns false if it isn't tracked (anymore),
    /// in which case nothing is released.
    pub fn release_handle(&self, handle: LoadHandle) -> bool {
        {
            let mut state = lock(&self.state);
            let Some(index) = state.handles.iter().position(|tracked| *tracked == handle) else {
                return false;
            };
            state.handles.remove(index);
        }

        self.release_now(handle);
        true
    }

    /// Disposables are not deduplicated, registering the same resource twice disposes it twice.
    pub fn register_disposable<D: Disposable + 'static>(&self, disposable: D) {
        let mut disposable = Box::new(disposable);
        {
            let mut state = lock(&self.state);
            if !state.torn_down {
                state.disposables.push(disposable);
                return;
            }
        }

        warn!("{}: disposable registered after teardown, disposing it right away", self.owner);
        if let Err(err) = disposable.dispose() {
            error!("{}: failed to dispose: {:#}", self.owner, err);
        }
    }

    pub fn pending_handles(&self) -> Vec<LoadHandle> {
        lock(&self.state).handles.clone()
    }

    pub fn is_torn_down(&self) -> bool {
        lock(&self.state).torn_down
    }

    /// Disposes all disposables in registration order, then releases all handles.
    /// A failing item is logged and does not keep the remaining ones from being released.
    pub fn teardown(&self) {
        let (disposables, handles) = {
            let mut state = lock(&self.state);
            if state.torn_down {
                return;
            }

            state.torn_down = true;
            (
                std::mem::take(&mut state.disposables),
                std::mem::take(&mut state.handles),
            )
        };

        for mut disposable in disposables {
            if let Err(err) = disposable.dispose() {
                error!("{}: failed to dispose: {:#}", self.owner, err);
            }
        }

        for handle in handles {
            self.release_now(handle);
        }

        info!("{} disposed", self.owner);
    }

    fn release_now(&self, handle: LoadHandle) {
        if let Err(err) = self.releaser.release(handle) {
            error!("{}: failed to release handle {}: {:#}", self.owner, handle, err);
        }
    }
}

impl Drop for ResourceRegistry {
    fn drop(&mut self) {
        self.teardown();
    }
}
