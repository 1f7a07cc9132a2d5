pub mod fade;
pub mod progress_view;
