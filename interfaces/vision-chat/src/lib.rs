//! # Vision Chat
//!
//! This crate wires a chat about an uploaded image on top of a vision language model. It turns the
//! chat history and a new message into a role tagged conversation, renders it with the model's
//! chat template, and streams the answer back while the model generates it on its own thread.
//!
//! The model, the image processor and the tokenizer are collaborators behind the
//! [`VisionLanguageModel`], [`ImageProcessor`] and [`ChatTokenizer`] traits.
//!
//! ## Usage
//!
//! ```rust, no_run
//! use vision_chat::*;
//! use futures_util::StreamExt;
//!
//! async fn chat(bot: ChatBot) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut history = History::new();
//!     let message = ChatMessage::new("What does the chart display?").with_file("./chart.png");
//!     let mut response = bot.respond(&message, &history)?;
//!     let mut answer = String::new();
//!     while let Some(buffer) = response.next().await {
//!         answer = buffer?;
//!     }
//!     record_exchange(&mut history, &message, answer);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub use futures_util::StreamExt;

mod bot;
pub use bot::*;
mod conversation;
pub use conversation::*;
mod error;
pub use error::*;
mod interface;
pub use interface::*;
mod message;
pub use message::*;
mod model;
pub use model::*;
mod prompt;
pub use prompt::*;
mod streamer;
pub use streamer::*;
