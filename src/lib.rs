pub mod config;
pub mod core;
pub mod logging;

pub use config::Config;
