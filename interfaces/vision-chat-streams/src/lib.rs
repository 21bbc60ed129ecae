//! # vision-chat-streams
//!
//! This crate contains utilities for handling streams of generated text: channel backed streams,
//! streams that give up when the producer goes quiet, and streams that surface the whole response
//! so far after every chunk.

#![warn(missing_docs)]

mod sender;
pub mod text_stream;
pub mod timed_stream;

pub use sender::*;
