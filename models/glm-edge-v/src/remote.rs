use base64::Engine;
use futures_util::StreamExt;
use reqwest_eventsource::{Event, RequestBuilderExt};
use serde::{Deserialize, Serialize};
use vision_chat::{
    BoxedError, GenerationRequest, PixelValues, TokenStreamer, VisionLanguageModel,
};

use crate::GlmError;

/// The address of a generation server running on the local machine.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8000";

/// A GLM-Edge-V model served by a generation server.
///
/// The server receives the tokenized prompt and the preprocessed image on `POST /generate` and
/// answers with server sent events carrying the new token ids.
#[derive(Clone, Debug)]
pub struct RemoteGlmEdgeV {
    base_url: String,
    name_or_path: String,
    client: reqwest::Client,
}

impl RemoteGlmEdgeV {
    /// Create a client for the server at `base_url`.
    pub fn new(base_url: impl ToString, name_or_path: impl ToString) -> Self {
        Self {
            base_url: base_url.to_string().trim_end_matches('/').to_string(),
            name_or_path: name_or_path.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Use a custom HTTP client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// The base URL of the server.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn stream_tokens(
        &self,
        request: GenerationRequest,
        streamer: &mut dyn TokenStreamer,
    ) -> Result<(), BoxedError> {
        streamer.put(&request.inputs.input_ids)?;

        let body = GenerateBody::new(&request);
        let url = format!("{}/generate", self.base_url);
        tracing::debug!("Requesting generation from {url}");
        let mut event_source = self
            .client
            .post(&url)
            .json(&body)
            .eventsource()
            .map_err(GlmError::from)?;

        while let Some(event) = event_source.next().await {
            let message = match event {
                Ok(Event::Open) => continue,
                Ok(Event::Message(message)) => message,
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(err) => {
                    event_source.close();
                    return Err(GlmError::from(err).into());
                }
            };
            match parse_server_event(&message.event, &message.data) {
                Ok(ServerEvent::Tokens(ids)) => {
                    if let Err(err) = streamer.put(&ids) {
                        event_source.close();
                        return Err(err.into());
                    }
                }
                Ok(ServerEvent::Done) => break,
                Err(err) => {
                    event_source.close();
                    return Err(err.into());
                }
            }
        }
        event_source.close();

        streamer.end()?;
        Ok(())
    }
}

impl VisionLanguageModel for RemoteGlmEdgeV {
    fn name_or_path(&self) -> &str {
        &self.name_or_path
    }

    fn generate(
        &self,
        request: GenerationRequest,
        streamer: &mut dyn TokenStreamer,
    ) -> Result<(), BoxedError> {
        // generation runs on its own thread, outside of any runtime
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.stream_tokens(request, streamer))
    }
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    input_ids: &'a [u32],
    attention_mask: &'a [u32],
    pixel_values: PixelPayload,
    max_new_tokens: u32,
    do_sample: bool,
    temperature: f32,
}

impl<'a> GenerateBody<'a> {
    fn new(request: &'a GenerationRequest) -> Self {
        Self {
            input_ids: &request.inputs.input_ids,
            attention_mask: &request.inputs.attention_mask,
            pixel_values: PixelPayload::new(&request.pixel_values),
            max_new_tokens: request.parameters.max_new_tokens,
            do_sample: request.parameters.do_sample,
            temperature: request.parameters.temperature,
        }
    }
}

/// The image tensor as base64 encoded little endian `f32`s.
#[derive(Serialize)]
struct PixelPayload {
    shape: [usize; 4],
    data: String,
}

impl PixelPayload {
    fn new(pixel_values: &PixelValues) -> Self {
        let bytes: Vec<u8> = pixel_values
            .data()
            .iter()
            .flat_map(|value| value.to_le_bytes())
            .collect();
        Self {
            shape: pixel_values.shape(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }
}

#[derive(Deserialize)]
struct TokenChunk {
    token_ids: Vec<u32>,
}

#[derive(Debug, PartialEq, Eq)]
enum ServerEvent {
    Tokens(Vec<u32>),
    Done,
}

fn parse_server_event(event: &str, data: &str) -> Result<ServerEvent, GlmError> {
    if event == "error" {
        return Err(GlmError::Server(data.to_string()));
    }
    if data.trim() == "[DONE]" {
        return Ok(ServerEvent::Done);
    }
    let chunk: TokenChunk = serde_json::from_str(data)?;
    Ok(ServerEvent::Tokens(chunk.token_ids))
}
