pub mod config;
pub mod formats;
pub mod types;
