pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod error;
pub mod hls;
pub mod logging;
pub mod models;
pub mod provider;
pub mod repository;
pub mod service;
pub mod timer;

pub use config::Config;
pub use error::{Error, Result};
