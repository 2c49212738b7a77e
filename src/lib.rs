//! Mediaforge - media acquisition and transcoding job queue
//!
//! This library crate exposes the queue core for integration testing.

pub mod config;
pub mod observer;
pub mod processor;
pub mod queue;
pub mod stage;
