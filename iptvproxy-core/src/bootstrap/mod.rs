//! Bootstrap module for initializing the proxy
//!
//! This module handles:
//! - Configuration loading
//! - Database initialization and migrations
//! - Service initialization and dependency injection

pub mod config;
pub mod database;
pub mod services;

pub use config::load_config;
pub use database::{init_database, run_migrations};
pub use services::{init_services, Services};
