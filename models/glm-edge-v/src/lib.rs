//! # GLM-Edge-V
//!
//! The collaborators a [`vision_chat::ChatBot`] needs to talk to a
//! [GLM-Edge-V](https://huggingface.co/THUDM/glm-edge-v-2b) model: the tokenizer with the model's
//! chat template, the image processor, and a client for a server that runs the model.
//!
//! ## Usage
//!
//! ```rust, no_run
//! use glm_edge_v::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bot = GlmEdgeV::builder()
//!         .with_source(GlmEdgeVSource::glm_edge_v_2b())
//!         .with_endpoint("http://127.0.0.1:8000")
//!         .build()
//!         .await?;
//!
//!     let message = ChatMessage::new("What is the text saying?").with_file("./small.png");
//!     let mut response = bot.respond(&message, &[])?;
//!     while let Some(buffer) = response.next().await {
//!         println!("{}", buffer?);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

mod chat_template;
mod processor;
mod remote;
mod source;
mod tokenizer;

pub use chat_template::{DEFAULT_GLM_EDGE_TEMPLATE, DEFAULT_IMAGE_TOKEN_COUNT};
pub use processor::*;
pub use remote::*;
pub use source::*;
pub use tokenizer::*;
pub use vision_chat_common::*;

use std::sync::{Arc, Mutex};
use vision_chat::{ChatBot, GenerationParameters};

/// A prelude of commonly used items in glm-edge-v.
pub mod prelude {
    pub use crate::{GlmEdgeV, GlmEdgeVBuilder, GlmEdgeVSource, RemoteGlmEdgeV};
    pub use vision_chat::*;
}

/// An error while loading or talking to a GLM-Edge-V model.
#[derive(Debug, thiserror::Error)]
pub enum GlmError {
    /// A file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// A config file or a server message was not valid json.
    #[error("Failed to parse json: {0}")]
    Json(#[from] serde_json::Error),
    /// The tokenizer failed to load.
    #[error("Tokenizer error: {0}")]
    Tokenizer(tokenizers::Error),
    /// The chat template failed to compile or render.
    #[error("Chat template error: {0}")]
    ChatTemplate(#[from] minijinja::Error),
    /// The processor was configured with an image size it cannot produce.
    #[error("Cannot resize images to {width}x{height}")]
    InvalidImageSize {
        /// The configured height
        height: u32,
        /// The configured width
        width: u32,
    },
    /// A model file could not be fetched.
    #[error("Failed to fetch a model file: {0}")]
    Cache(#[from] CacheError),
    /// The generation request could not be sent.
    #[error("Failed to send the generation request: {0}")]
    CannotCloneRequest(#[from] reqwest_eventsource::CannotCloneRequestError),
    /// The event stream from the server failed.
    #[error("Error receiving server side events: {0}")]
    EventSource(#[from] reqwest_eventsource::Error),
    /// The server reported an error while generating.
    #[error("The generation server reported an error: {0}")]
    Server(String),
    /// A loading task panicked or was cancelled.
    #[error("Loading task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Entry point for building a [`ChatBot`] backed by GLM-Edge-V.
pub struct GlmEdgeV;

impl GlmEdgeV {
    /// Create a builder for a GLM-Edge-V chat bot.
    pub fn builder() -> GlmEdgeVBuilder {
        GlmEdgeVBuilder::default()
    }
}

/// A builder with configuration for a GLM-Edge-V chat bot.
#[derive(Clone, Debug)]
pub struct GlmEdgeVBuilder {
    source: GlmEdgeVSource,
    endpoint: String,
    parameters: GenerationParameters,
    cache: Cache,
}

impl Default for GlmEdgeVBuilder {
    fn default() -> Self {
        Self {
            source: GlmEdgeVSource::default(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            parameters: GenerationParameters::default(),
            cache: Cache::default(),
        }
    }
}

impl GlmEdgeVBuilder {
    /// Set the source of the tokenizer and preprocessor files.
    pub fn with_source(mut self, source: GlmEdgeVSource) -> Self {
        self.source = source;
        self
    }

    /// Set the address of the generation server.
    pub fn with_endpoint(mut self, endpoint: impl ToString) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    /// Set the generation parameters.
    pub fn with_parameters(mut self, parameters: GenerationParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set the cache downloaded files are stored in.
    pub fn with_cache(mut self, cache: Cache) -> Self {
        self.cache = cache;
        self
    }

    /// Download every file of the source without building the bot.
    pub async fn prefetch_with_loading_handler(
        &self,
        handler: impl FnMut(ModelLoadingProgress) + Send + Sync + 'static,
    ) -> Result<(), GlmError> {
        let handler = Arc::new(Mutex::new(handler));
        for file in self.source.files() {
            self.fetch(file, &handler).await?;
        }
        Ok(())
    }

    /// Build the chat bot, reporting download progress to `handler`.
    pub async fn build_with_loading_handler(
        self,
        handler: impl FnMut(ModelLoadingProgress) + Send + Sync + 'static,
    ) -> Result<ChatBot, GlmError> {
        let handler = Arc::new(Mutex::new(handler));
        let tokenizer_path = self.fetch(&self.source.tokenizer, &handler).await?;
        let tokenizer_config_path = self.fetch(&self.source.tokenizer_config, &handler).await?;
        let preprocessor_path = self.fetch(&self.source.preprocessor_config, &handler).await?;

        report(&handler, ModelLoadingProgress::loading(0.0));
        let tokenizer = tokio::task::spawn_blocking(move || {
            GlmTokenizer::from_files(tokenizer_path, tokenizer_config_path)
        })
        .await??;
        let processor = GlmImageProcessor::new(PreprocessorConfig::from_file(preprocessor_path)?);
        report(&handler, ModelLoadingProgress::loading(1.0));

        let model = RemoteGlmEdgeV::new(&self.endpoint, self.source.name_or_path());
        tracing::info!(
            "Chatting with {} through {}",
            self.source.name_or_path(),
            model.base_url()
        );
        Ok(ChatBot::new(model, processor, tokenizer).with_parameters(self.parameters))
    }

    /// Build the chat bot, showing download progress in the terminal.
    pub async fn build(self) -> Result<ChatBot, GlmError> {
        self.build_with_loading_handler(ModelLoadingProgress::multi_bar_loading_indicator())
            .await
    }

    async fn fetch(
        &self,
        file: &FileSource,
        handler: &Arc<Mutex<impl FnMut(ModelLoadingProgress) + Send + Sync>>,
    ) -> Result<std::path::PathBuf, GlmError> {
        let mut create_progress = ModelLoadingProgress::downloading_progress(file.to_string());
        let path = self
            .cache
            .get(file, |progress| report(handler, create_progress(progress)))
            .await?;
        Ok(path)
    }
}

fn report(
    handler: &Arc<Mutex<impl FnMut(ModelLoadingProgress) + Send + Sync>>,
    progress: ModelLoadingProgress,
) {
    if let Ok(mut handler) = handler.lock() {
        handler(progress);
    }
}
