use dashmap::DashMap;
use log::trace;

/// Key under which the address of the scene to load next is passed on to the loading scene.
pub const SCENE_TO_LOAD_KEY: &str = "SceneToLoad";
/// Scene the loading screen falls back to when nobody asked for a specific one.
pub const DEFAULT_SCENE: &str = "SceneLogin";

/// String state that survives a scene change.
pub trait BridgeStore: Send + Sync + 'static {
    fn set_string(&self, key: &str, value: &str) -> anyhow::Result<()>;

    fn get_string(&self, key: &str, default: &str) -> String;
}

#[derive(Debug, Default)]
pub struct InMemoryBridge {
    values: DashMap<String, String>,
}

impl InMemoryBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

impl BridgeStore for InMemoryBridge {
    fn set_string(&self, key: &str, value: &str) -> anyhow::Result<()> {
        trace!("Bridge: {} = {}", key, value);
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get_string(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .map(|value| value.clone())
            .unwrap_or_else(|| default.to_string())
    }
}
