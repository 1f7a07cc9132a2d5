pub mod bridge;
pub mod loader;
