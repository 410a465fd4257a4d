pub mod config;
pub mod core;
pub mod logging;

// Re-export main components for easy access
pub use config::Config;
pub use core::*;
