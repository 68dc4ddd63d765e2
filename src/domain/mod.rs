//! Domain types: decoded wheel state, commands, configuration and settings.

pub mod commands;
pub mod config;
pub mod models;
pub mod settings;
