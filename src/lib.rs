#![forbid(unsafe_code)]

//! Telegram bot that turns media links into audio files.
//!
//! A user sends a URL; the bot resolves it with an external extraction tool,
//! stores the transcoded audio under a fresh identifier, and sends the file
//! back either as-is or wrapped in a ZIP archive. A small HTTP endpoint lists
//! everything stored so far.

pub mod auth;
pub mod config;
pub mod error;
pub mod extractor;
pub mod http;
pub mod packaging;
pub mod pipeline;
pub mod progress;
pub mod security;
pub mod storage;
pub mod telegram;
pub mod telemetry;

pub use error::{Error, Result};
