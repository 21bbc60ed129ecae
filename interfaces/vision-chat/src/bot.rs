use crate::{
    build_conversation, model_display_name, resolve_image, BoxedError, ChatError, ChatInterface,
    ChatMessage, ChatTokenizer, GenerationParameters, GenerationRequest, ImageProcessor,
    StreamClosed, TextIteratorStream, TextIteratorStreamer, TokenDecoder, TokenStreamer, Turn,
    VisionLanguageModel,
};
use std::sync::Arc;
use vision_chat_streams::text_stream::{TryAccumulatingStream, TryTextStream};

/// The response to a message: the full answer so far after every new piece of text.
pub type ResponseStream = TryAccumulatingStream<TextIteratorStream>;

/// A chat about an uploaded image, wired from a model, an image processor and a tokenizer.
///
/// ```rust, no_run
/// # use vision_chat::*;
/// # use futures_util::StreamExt;
/// # async fn run(bot: ChatBot) -> Result<(), Box<dyn std::error::Error>> {
/// let message = ChatMessage::new("What is the text saying?").with_file("./small.png");
/// let mut response = bot.respond(&message, &[])?;
/// while let Some(buffer) = response.next().await {
///     println!("{}", buffer?);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ChatBot {
    model: Arc<dyn VisionLanguageModel>,
    processor: Arc<dyn ImageProcessor>,
    tokenizer: Arc<dyn ChatTokenizer>,
    parameters: GenerationParameters,
    model_name: String,
}

impl std::fmt::Debug for ChatBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatBot")
            .field("model_name", &self.model_name)
            .field("parameters", &self.parameters)
            .finish()
    }
}

impl ChatBot {
    /// Create a chat bot with the default generation parameters.
    pub fn new(
        model: impl VisionLanguageModel,
        processor: impl ImageProcessor + 'static,
        tokenizer: impl ChatTokenizer + 'static,
    ) -> Self {
        Self::from_shared(Arc::new(model), Arc::new(processor), Arc::new(tokenizer))
    }

    /// Create a chat bot from collaborators that are shared with other code.
    pub fn from_shared(
        model: Arc<dyn VisionLanguageModel>,
        processor: Arc<dyn ImageProcessor>,
        tokenizer: Arc<dyn ChatTokenizer>,
    ) -> Self {
        let model_name = model_display_name(model.name_or_path());
        Self {
            model,
            processor,
            tokenizer,
            parameters: GenerationParameters::default(),
            model_name,
        }
    }

    /// Set the generation parameters.
    pub fn with_parameters(mut self, parameters: GenerationParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// The generation parameters.
    pub fn parameters(&self) -> &GenerationParameters {
        &self.parameters
    }

    /// The name of the model shown to the user.
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// The interface a frontend should show for this bot.
    pub fn interface(&self) -> ChatInterface {
        ChatInterface::new(&self.model_name)
    }

    /// Respond to a message.
    ///
    /// Fails before generation starts if no image was uploaded in the message or the history.
    /// Otherwise generation runs on its own thread and the returned stream yields the growing
    /// answer. Dropping the stream stops generation.
    pub fn respond(
        &self,
        message: &ChatMessage,
        history: &[Turn],
    ) -> Result<ResponseStream, ChatError> {
        tracing::debug!("message is - {message:?}");
        tracing::debug!("history is - {history:?}");

        let image = resolve_image(message, history).ok_or_else(|| ChatError::MissingImage {
            model_name: self.model_name.clone(),
        })?;

        let conversation = build_conversation(history, message, &image);
        tracing::debug!("prompt is - {conversation:?}");
        let inputs = self
            .tokenizer
            .apply_chat_template(&conversation, true)
            .map_err(ChatError::Template)?;

        let picture = image::open(&image.path).map_err(|source| ChatError::Image {
            path: image.path.clone(),
            source,
        })?;
        let pixel_values = self
            .processor
            .process(&picture)
            .map_err(ChatError::Processor)?;

        let decoder = Arc::new(TemplateDecoder(self.tokenizer.clone()));
        let (streamer, stream) = TextIteratorStreamer::new(decoder, self.parameters.timeout);
        let request = GenerationRequest {
            pixel_values,
            inputs,
            parameters: self.parameters.clone(),
        };

        let model = self.model.clone();
        std::thread::Builder::new()
            .name("vision-chat-generate".to_string())
            .spawn(move || generate(model, request, streamer))?;

        Ok(stream.try_accumulate())
    }
}

fn generate(
    model: Arc<dyn VisionLanguageModel>,
    request: GenerationRequest,
    mut streamer: TextIteratorStreamer,
) {
    match model.generate(request, &mut streamer) {
        Ok(()) => {
            if !streamer.is_finished() {
                let _ = streamer.end();
            }
        }
        Err(err) if err.downcast_ref::<StreamClosed>().is_some() => {
            tracing::debug!("Generation stopped because the response was dropped");
        }
        Err(err) => {
            tracing::warn!("Generation failed: {err}");
            streamer.fail(err);
        }
    }
}

struct TemplateDecoder(Arc<dyn ChatTokenizer>);

impl TokenDecoder for TemplateDecoder {
    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String, BoxedError> {
        self.0.decode(ids, skip_special_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConversationEntry, PixelValues, StreamError, TokenizedInputs};
    use futures_util::StreamExt;
    use image::DynamicImage;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    const VOCABULARY: &[&str] = &["<eos>", "The", " text", " says", " hello", "."];

    /// Answers with a fixed list of tokens after pushing the prompt.
    struct ScriptedModel {
        answer: Vec<u32>,
        seen: Arc<Mutex<Option<GenerationRequest>>>,
        fail_after: Option<usize>,
    }

    impl VisionLanguageModel for ScriptedModel {
        fn name_or_path(&self) -> &str {
            "glm-edge-v-2b/INT4"
        }

        fn generate(
            &self,
            request: GenerationRequest,
            streamer: &mut dyn TokenStreamer,
        ) -> Result<(), BoxedError> {
            streamer.put(&request.inputs.input_ids)?;
            *self.seen.lock().unwrap() = Some(request);
            for (index, token) in self.answer.iter().enumerate() {
                if Some(index) == self.fail_after {
                    return Err("device lost".into());
                }
                streamer.put(&[*token])?;
            }
            streamer.end()?;
            Ok(())
        }
    }

    struct FlatProcessor;

    impl ImageProcessor for FlatProcessor {
        fn process(&self, image: &DynamicImage) -> Result<PixelValues, BoxedError> {
            let (width, height) = (image.width() as usize, image.height() as usize);
            PixelValues::new([1, 3, height, width], vec![0.5; 3 * width * height])
                .ok_or_else(|| "shape mismatch".into())
        }
    }

    /// Renders the conversation as JSON and uses one token per byte.
    struct JsonTokenizer {
        rendered: Arc<Mutex<Vec<ConversationEntry>>>,
    }

    impl TokenDecoder for JsonTokenizer {
        fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String, BoxedError> {
            Ok(ids
                .iter()
                .filter(|id| !(skip_special_tokens && **id == 0))
                .filter_map(|id| VOCABULARY.get(*id as usize))
                .copied()
                .collect())
        }
    }

    impl ChatTokenizer for JsonTokenizer {
        fn apply_chat_template(
            &self,
            conversation: &[ConversationEntry],
            add_generation_prompt: bool,
        ) -> Result<TokenizedInputs, BoxedError> {
            assert!(add_generation_prompt);
            *self.rendered.lock().unwrap() = conversation.to_vec();
            let rendered = serde_json::to_string(conversation)?;
            Ok(TokenizedInputs::new(
                rendered.bytes().map(u32::from).collect(),
            ))
        }
    }

    struct Fixture {
        bot: ChatBot,
        seen: Arc<Mutex<Option<GenerationRequest>>>,
        rendered: Arc<Mutex<Vec<ConversationEntry>>>,
        image: PathBuf,
    }

    fn fixture(name: &str, fail_after: Option<usize>) -> Fixture {
        let image = std::env::temp_dir().join(format!(
            "vision-chat-bot-{name}-{}.png",
            std::process::id()
        ));
        image::RgbImage::from_pixel(4, 2, image::Rgb([255, 0, 0]))
            .save(&image)
            .unwrap();

        let seen = Arc::new(Mutex::new(None));
        let rendered = Arc::new(Mutex::new(Vec::new()));
        let bot = ChatBot::new(
            ScriptedModel {
                answer: vec![1, 2, 3, 4, 5, 0],
                seen: seen.clone(),
                fail_after,
            },
            FlatProcessor,
            JsonTokenizer {
                rendered: rendered.clone(),
            },
        )
        .with_parameters(GenerationParameters::default().with_timeout(Duration::from_secs(10)));
        Fixture {
            bot,
            seen,
            rendered,
            image,
        }
    }

    #[tokio::test]
    async fn streams_a_growing_answer() {
        let fixture = fixture("grow", None);
        let message = ChatMessage::new("What is the text saying?").with_file(fixture.image.clone());

        let buffers: Vec<_> = fixture
            .bot
            .respond(&message, &[])
            .unwrap()
            .collect()
            .await;
        assert_eq!(
            buffers,
            vec![
                Ok("The ".to_string()),
                Ok("The text ".to_string()),
                Ok("The text says ".to_string()),
                Ok("The text says hello.".to_string()),
            ]
        );

        assert_eq!(
            *fixture.rendered.lock().unwrap(),
            vec![ConversationEntry::user_with_image("What is the text saying?")]
        );
        let seen = fixture.seen.lock().unwrap().take().unwrap();
        assert_eq!(seen.pixel_values.shape(), [1, 3, 2, 4]);
        assert_eq!(seen.parameters.max_new_tokens, 1024);
        assert!(!seen.parameters.do_sample);
        assert_eq!(
            seen.inputs.attention_mask.len(),
            seen.inputs.input_ids.len()
        );
        std::fs::remove_file(fixture.image).unwrap();
    }

    #[test]
    fn responding_does_not_need_a_runtime() {
        let fixture = fixture("no-runtime", None);
        let message = ChatMessage::new("What is the text saying?").with_file(fixture.image.clone());
        let response = fixture.bot.respond(&message, &[]).unwrap();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let last = runtime.block_on(response.collect::<Vec<_>>()).pop();
        assert_eq!(last, Some(Ok("The text says hello.".to_string())));
        std::fs::remove_file(fixture.image).unwrap();
    }

    #[tokio::test]
    async fn missing_image_fails_before_generation() {
        let fixture = fixture("missing", None);
        let history = vec![Turn::new("Hello", "Hi!")];
        let err = fixture
            .bot
            .respond(&ChatMessage::new("Describe it"), &history)
            .unwrap_err();

        assert!(err.is_user_facing());
        assert_eq!(
            err.to_string(),
            "You need to upload an image for glm-edge-v-2b to work. Close the error and try again with an Image."
        );
        assert!(fixture.seen.lock().unwrap().is_none());
        std::fs::remove_file(fixture.image).unwrap();
    }

    #[tokio::test]
    async fn image_from_history_is_used() {
        let fixture = fixture("history", None);
        let history = vec![
            Turn::in_progress(fixture.image.clone()),
            Turn::new("What is the text saying?", "It says hello."),
        ];

        let last = fixture
            .bot
            .respond(&ChatMessage::new("Are you sure?"), &history)
            .unwrap()
            .collect::<Vec<_>>()
            .await
            .pop();
        assert_eq!(last, Some(Ok("The text says hello.".to_string())));
        assert_eq!(fixture.rendered.lock().unwrap().len(), 3);
        std::fs::remove_file(fixture.image).unwrap();
    }

    #[tokio::test]
    async fn generation_failures_reach_the_stream() {
        let fixture = fixture("fail", Some(2));
        let message = ChatMessage::new("What is the text saying?").with_file(fixture.image.clone());

        let buffers: Vec<_> = fixture
            .bot
            .respond(&message, &[])
            .unwrap()
            .collect()
            .await;
        assert_eq!(
            buffers,
            vec![
                Ok("The ".to_string()),
                Err(StreamError::Generation("device lost".to_string())),
            ]
        );
        std::fs::remove_file(fixture.image).unwrap();
    }

    #[tokio::test]
    async fn unreadable_image_is_reported() {
        let fixture = fixture("unreadable", None);
        let message = ChatMessage::new("Hi").with_file("/definitely/not/here.png");
        let err = fixture.bot.respond(&message, &[]).unwrap_err();
        assert!(matches!(err, ChatError::Image { .. }));
        assert!(!err.is_user_facing());
        std::fs::remove_file(fixture.image).unwrap();
    }
}
