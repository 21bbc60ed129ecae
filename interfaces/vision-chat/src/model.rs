//! The collaborators a chat bot is wired from: an image processor, a chat tokenizer and a vision
//! language model. Inference itself lives behind these traits.

use crate::ConversationEntry;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A boxed error returned by a collaborator.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The preprocessed image tensor, laid out as `[batch, channels, height, width]`.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelValues {
    shape: [usize; 4],
    data: Vec<f32>,
}

impl PixelValues {
    /// Create pixel values from a shape and the row major data.
    ///
    /// Returns `None` if the data does not match the shape.
    pub fn new(shape: [usize; 4], data: Vec<f32>) -> Option<Self> {
        (shape.iter().product::<usize>() == data.len()).then_some(Self { shape, data })
    }

    /// The shape of the tensor.
    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    /// The row major data of the tensor.
    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

/// The tokenized prompt.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizedInputs {
    /// The token ids of the rendered prompt
    pub input_ids: Vec<u32>,
    /// One for every token the model should attend to
    pub attention_mask: Vec<u32>,
}

impl TokenizedInputs {
    /// Inputs that attend to every token.
    pub fn new(input_ids: Vec<u32>) -> Self {
        let attention_mask = vec![1; input_ids.len()];
        Self {
            input_ids,
            attention_mask,
        }
    }
}

/// The parameters for a single response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParameters {
    /// The maximum number of tokens to generate
    pub max_new_tokens: u32,
    /// Sample from the distribution instead of decoding greedily
    pub do_sample: bool,
    /// The sampling temperature
    pub temperature: f32,
    /// How long to wait for the next piece of text before giving up
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            max_new_tokens: 1024,
            do_sample: false,
            temperature: 0.0,
            timeout: Duration::from_secs(60),
        }
    }
}

impl GenerationParameters {
    /// Set the maximum number of tokens to generate.
    pub fn with_max_new_tokens(mut self, max_new_tokens: u32) -> Self {
        self.max_new_tokens = max_new_tokens;
        self
    }

    /// Set whether to sample.
    pub fn with_do_sample(mut self, do_sample: bool) -> Self {
        self.do_sample = do_sample;
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set how long to wait for the next piece of text.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// Everything the model needs to answer.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    /// The preprocessed image
    pub pixel_values: PixelValues,
    /// The tokenized prompt
    pub inputs: TokenizedInputs,
    /// How to generate
    pub parameters: GenerationParameters,
}

/// Turns an image into the tensor the vision encoder expects.
pub trait ImageProcessor: Send + Sync {
    /// Preprocess an image.
    fn process(&self, image: &DynamicImage) -> Result<PixelValues, BoxedError>;
}

/// Decodes token ids back into text.
pub trait TokenDecoder: Send + Sync {
    /// Decode a slice of token ids.
    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String, BoxedError>;
}

/// Renders a conversation with the model's chat template and tokenizes the result.
pub trait ChatTokenizer: TokenDecoder {
    /// Apply the chat template to the conversation and tokenize it.
    ///
    /// With `add_generation_prompt` the rendered prompt ends with the marker that starts the
    /// assistant's answer.
    fn apply_chat_template(
        &self,
        conversation: &[ConversationEntry],
        add_generation_prompt: bool,
    ) -> Result<TokenizedInputs, BoxedError>;
}

/// The consumer of a response went away, so generation should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("The response stream was closed")]
pub struct StreamClosed;

/// Receives token ids from a model as they are generated.
pub trait TokenStreamer: Send {
    /// Push new token ids. The first call carries the prompt.
    fn put(&mut self, ids: &[u32]) -> Result<(), StreamClosed>;

    /// Signal that generation finished.
    fn end(&mut self) -> Result<(), StreamClosed>;
}

/// A vision language model that generates an answer for a prompt and an image.
pub trait VisionLanguageModel: Send + Sync + 'static {
    /// The path or id the model was loaded from.
    fn name_or_path(&self) -> &str;

    /// Generate an answer, pushing the prompt and then every new token into `streamer`.
    ///
    /// This blocks until generation finishes. Implementations should stop early if the streamer
    /// returns [`StreamClosed`].
    fn generate(
        &self,
        request: GenerationRequest,
        streamer: &mut dyn TokenStreamer,
    ) -> Result<(), BoxedError>;
}
