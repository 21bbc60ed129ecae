use std::path::Path;

use serde::Deserialize;
use tokenizers::Tokenizer;
use vision_chat::{BoxedError, ChatTokenizer, ConversationEntry, TokenDecoder, TokenizedInputs};

use crate::chat_template::{
    HuggingFaceChatTemplate, DEFAULT_GLM_EDGE_TEMPLATE, DEFAULT_IMAGE_TOKEN_COUNT,
};
use crate::GlmError;

/// The parts of `tokenizer_config.json` the chat needs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct TokenizerConfig {
    #[serde(default)]
    chat_template: Option<ChatTemplateSource>,
    #[serde(default)]
    bos_token: Option<SpecialToken>,
    #[serde(default)]
    eos_token: Option<SpecialToken>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum ChatTemplateSource {
    Single(String),
    Named(Vec<NamedChatTemplate>),
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
struct NamedChatTemplate {
    name: String,
    template: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum SpecialToken {
    Text(String),
    Added { content: String },
}

impl SpecialToken {
    fn content(&self) -> &str {
        match self {
            SpecialToken::Text(text) => text,
            SpecialToken::Added { content } => content,
        }
    }
}

impl TokenizerConfig {
    /// Read the config from a `tokenizer_config.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GlmError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Parse the config from json.
    pub fn from_json(text: &str) -> Result<Self, GlmError> {
        Ok(serde_json::from_str(text)?)
    }

    /// The chat template of the model. Multiple named templates resolve to the one named
    /// `default`, or the first one.
    pub fn chat_template(&self) -> Option<&str> {
        match self.chat_template.as_ref()? {
            ChatTemplateSource::Single(template) => Some(template),
            ChatTemplateSource::Named(templates) => templates
                .iter()
                .find(|template| template.name == "default")
                .or_else(|| templates.first())
                .map(|template| template.template.as_str()),
        }
    }

    /// The text of the beginning of sequence token.
    pub fn bos_token(&self) -> &str {
        self.bos_token.as_ref().map_or("", SpecialToken::content)
    }

    /// The text of the end of sequence token.
    pub fn eos_token(&self) -> &str {
        self.eos_token.as_ref().map_or("", SpecialToken::content)
    }
}

/// The GLM-Edge-V tokenizer together with its chat template.
pub struct GlmTokenizer {
    tokenizer: Tokenizer,
    chat_template: HuggingFaceChatTemplate,
    bos_token: String,
    eos_token: String,
    image_token_count: usize,
}

impl GlmTokenizer {
    /// Create a tokenizer from a loaded `tokenizer.json` and its config. Falls back to the GLM
    /// chat template if the config does not carry one.
    pub fn new(tokenizer: Tokenizer, config: &TokenizerConfig) -> Result<Self, GlmError> {
        let chat_template = match config.chat_template() {
            Some(template) => template,
            None => {
                tracing::debug!("No chat template in the tokenizer config, using the GLM template");
                DEFAULT_GLM_EDGE_TEMPLATE
            }
        };
        Ok(Self {
            tokenizer,
            chat_template: HuggingFaceChatTemplate::create(chat_template)?,
            bos_token: config.bos_token().to_string(),
            eos_token: config.eos_token().to_string(),
            image_token_count: DEFAULT_IMAGE_TOKEN_COUNT,
        })
    }

    /// Load the tokenizer from `tokenizer.json` and `tokenizer_config.json` files.
    pub fn from_files(
        tokenizer: impl AsRef<Path>,
        tokenizer_config: impl AsRef<Path>,
    ) -> Result<Self, GlmError> {
        let tokenizer = Tokenizer::from_file(tokenizer).map_err(GlmError::Tokenizer)?;
        let config = TokenizerConfig::from_file(tokenizer_config)?;
        Self::new(tokenizer, &config)
    }

    /// Set how many image tokens an image placeholder expands to.
    pub fn with_image_token_count(mut self, image_token_count: usize) -> Self {
        self.image_token_count = image_token_count;
        self
    }

    /// Render the conversation with the chat template without tokenizing it.
    pub fn render(
        &self,
        conversation: &[ConversationEntry],
        add_generation_prompt: bool,
    ) -> Result<String, GlmError> {
        Ok(self.chat_template.run(
            &self.bos_token,
            &self.eos_token,
            conversation,
            add_generation_prompt,
            self.image_token_count,
        )?)
    }
}

impl TokenDecoder for GlmTokenizer {
    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String, BoxedError> {
        self.tokenizer.decode(ids, skip_special_tokens)
    }
}

impl ChatTokenizer for GlmTokenizer {
    fn apply_chat_template(
        &self,
        conversation: &[ConversationEntry],
        add_generation_prompt: bool,
    ) -> Result<TokenizedInputs, BoxedError> {
        let prompt = self.render(conversation, add_generation_prompt)?;
        // the template already places the special tokens
        let encoding = self.tokenizer.encode(prompt, false)?;
        Ok(TokenizedInputs::new(encoding.get_ids().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    const TOKENIZER: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [
            {"id": 0, "content": "<|user|>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
            {"id": 1, "content": "<|assistant|>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
            {"id": 2, "content": "<|begin_of_image|>", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
        ],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {
                "<|user|>": 0,
                "<|assistant|>": 1,
                "<|begin_of_image|>": 2,
                "[UNK]": 3,
                "What": 10,
                "is": 11,
                "it": 12,
                "?": 13
            },
            "unk_token": "[UNK]"
        }
    }"#;

    fn tokenizer(config: &str) -> GlmTokenizer {
        let tokenizer = Tokenizer::from_str(TOKENIZER).unwrap();
        let config = TokenizerConfig::from_json(config).unwrap();
        GlmTokenizer::new(tokenizer, &config).unwrap()
    }

    #[test]
    fn reads_tokenizer_configs() {
        let config = TokenizerConfig::from_json(
            r#"{
                "bos_token": {"content": "<s>", "lstrip": false},
                "eos_token": "<|endoftext|>",
                "chat_template": [
                    {"name": "tool_use", "template": "tools"},
                    {"name": "default", "template": "chat"}
                ],
                "model_max_length": 8192
            }"#,
        )
        .unwrap();
        assert_eq!(config.bos_token(), "<s>");
        assert_eq!(config.eos_token(), "<|endoftext|>");
        assert_eq!(config.chat_template(), Some("chat"));

        let config = TokenizerConfig::from_json(r#"{"bos_token": null}"#).unwrap();
        assert_eq!(config.bos_token(), "");
        assert_eq!(config.chat_template(), None);
    }

    #[test]
    fn falls_back_to_the_glm_template() {
        let tokenizer = tokenizer("{}").with_image_token_count(3);
        let prompt = tokenizer
            .render(&[ConversationEntry::user_with_image("What is it?")], true)
            .unwrap();
        assert_eq!(
            prompt,
            "<|user|>\n<|begin_of_image|><|begin_of_image|><|begin_of_image|>What is it?\n<|assistant|>\n"
        );
    }

    #[test]
    fn tokenizes_the_rendered_prompt() {
        let tokenizer = tokenizer("{}").with_image_token_count(2);
        let inputs = tokenizer
            .apply_chat_template(&[ConversationEntry::user_with_image("What is it?")], true)
            .unwrap();
        assert_eq!(inputs.input_ids, vec![0, 2, 2, 10, 11, 12, 13, 1]);
        assert_eq!(inputs.attention_mask, vec![1; 8]);
    }

    #[test]
    fn decodes_with_and_without_special_tokens() {
        let tokenizer = tokenizer("{}");
        assert_eq!(tokenizer.decode(&[10, 11, 12, 13, 1], true).unwrap(), "What is it ?");
        assert_eq!(
            tokenizer.decode(&[10, 1], false).unwrap(),
            "What <|assistant|>"
        );
    }
}
