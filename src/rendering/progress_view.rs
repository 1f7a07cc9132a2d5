use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressBar {
    /// Assets of the target scene itself.
    Scene,
    /// Assets the activated scene pulls in on its own.
    Dependencies,
}

impl ProgressBar {
    pub fn prefix(&self) -> &'static str {
        match self {
            ProgressBar::Scene => "Scene",
            ProgressBar::Dependencies => "Dependencies",
        }
    }
}

impl Display for ProgressBar {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.prefix())
    }
}

/// The widgets of the loading screen: per bar an info label, a slider and a detail label.
pub trait ProgressView: Send + Sync + 'static {
    fn set_info(&self, bar: ProgressBar, text: &str);

    fn set_value(&self, bar: ProgressBar, value: f32);

    fn set_detail(&self, bar: ProgressBar, text: &str);
}
