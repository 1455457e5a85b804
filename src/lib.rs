//! Clipcast - music-video radio over HLS
//!
//! This library crate exposes the streaming engine and HTTP gateway for
//! integration testing.

pub mod catalog;
pub mod config;
pub mod jobs;
pub mod server;
pub mod streaming;
