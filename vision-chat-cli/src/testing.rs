//! Collaborators for testing the frontends without a model.

use std::path::PathBuf;

use image::{Rgb, RgbImage};
use vision_chat::{
    BoxedError, ChatBot, ChatTokenizer, ConversationEntry, GenerationRequest, ImageProcessor,
    PixelValues, TokenDecoder, TokenStreamer, TokenizedInputs, VisionLanguageModel,
};

/// Answers every message with "Hello there".
pub(crate) struct Greeter;

impl VisionLanguageModel for Greeter {
    fn name_or_path(&self) -> &str {
        "models/glm-edge-v-2b/INT4"
    }

    fn generate(
        &self,
        request: GenerationRequest,
        streamer: &mut dyn TokenStreamer,
    ) -> Result<(), BoxedError> {
        streamer.put(&request.inputs.input_ids)?;
        for byte in "Hello there\n".bytes() {
            streamer.put(&[byte as u32])?;
        }
        streamer.end()?;
        Ok(())
    }
}

pub(crate) struct OnePixel;

impl ImageProcessor for OnePixel {
    fn process(&self, _: &image::DynamicImage) -> Result<PixelValues, BoxedError> {
        PixelValues::new([1, 3, 1, 1], vec![0.0; 3]).ok_or_else(|| "bad shape".into())
    }
}

/// One token per byte of the conversation text.
pub(crate) struct ByteTokenizer;

impl TokenDecoder for ByteTokenizer {
    fn decode(&self, ids: &[u32], _: bool) -> Result<String, BoxedError> {
        let bytes: Vec<u8> = ids.iter().map(|id| *id as u8).collect();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl ChatTokenizer for ByteTokenizer {
    fn apply_chat_template(
        &self,
        conversation: &[ConversationEntry],
        _: bool,
    ) -> Result<TokenizedInputs, BoxedError> {
        let text: String = conversation.iter().map(ConversationEntry::text).collect();
        Ok(TokenizedInputs::new(text.bytes().map(u32::from).collect()))
    }
}

pub(crate) fn greeter_bot() -> ChatBot {
    ChatBot::new(Greeter, OnePixel, ByteTokenizer)
}

/// A fresh directory holding a white `small.png`.
pub(crate) fn test_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("vision-chat-cli-{name}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    RgbImage::from_pixel(4, 4, Rgb([255, 255, 255]))
        .save(dir.join("small.png"))
        .unwrap();
    dir
}
