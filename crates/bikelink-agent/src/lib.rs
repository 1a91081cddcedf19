//! Bikelink Agent - device daemon around the bike-side link.
//!
//! This crate provides:
//! - TOML and environment configuration
//! - Provisioning and maintenance of the file-backed trust store
//! - The message-queue dispatcher between a transport and the link
//! - A loop-back demo with a simulated server and phone

pub mod config;
pub mod demo;
pub mod dispatcher;
pub mod identity;

#[cfg(test)]
mod proptests;

pub use config::AgentConfig;
pub use dispatcher::{CommandHandler, Dispatcher, TransportAction, TransportEvent};
