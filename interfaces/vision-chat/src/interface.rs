use serde::Serialize;
use std::path::{Path, PathBuf};

/// A prompt the chat offers as an example, with the image it is about.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExamplePrompt {
    /// The text of the example message
    pub text: String,
    /// The files attached to the example message
    pub files: Vec<PathBuf>,
}

impl ExamplePrompt {
    /// Create an example prompt about a single file.
    pub fn new(text: impl ToString, file: impl Into<PathBuf>) -> Self {
        Self {
            text: text.to_string(),
            files: vec![file.into()],
        }
    }

    /// The example as a chat message.
    pub fn to_message(&self) -> crate::ChatMessage {
        crate::ChatMessage {
            text: self.text.clone(),
            files: self.files.iter().cloned().map(Into::into).collect(),
        }
    }
}

/// The examples shown next to the chat, using `small.png` and `chart.png` from `dir`.
pub fn default_examples(dir: &Path) -> Vec<ExamplePrompt> {
    vec![
        ExamplePrompt::new("What is the text saying?", dir.join("small.png")),
        ExamplePrompt::new("What does the chart display?", dir.join("chart.png")),
    ]
}

/// What a chat frontend shows around the conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatInterface {
    /// The title of the chat
    pub title: String,
    /// The text shown under the title
    pub description: String,
    /// Example prompts the user can start with
    pub examples: Vec<ExamplePrompt>,
    /// The label of the button that stops generation
    pub stop_button: String,
    /// Whether the chat accepts files next to text
    pub multimodal: bool,
}

impl ChatInterface {
    /// The interface for a model, without examples.
    pub fn new(model_name: &str) -> Self {
        Self {
            title: model_name.to_string(),
            description: "Upload an image and start chatting about it, or simply try one of the examples below. If you won't upload an image, you will receive an error.".to_string(),
            examples: Vec::new(),
            stop_button: "Stop Generation".to_string(),
            multimodal: true,
        }
    }

    /// Set the example prompts.
    pub fn with_examples(mut self, examples: Vec<ExamplePrompt>) -> Self {
        self.examples = examples;
        self
    }
}

/// The name shown for a model: the name of the directory that contains the model's path, so
/// `glm-edge-v-2b/INT4` shows up as `glm-edge-v-2b`.
pub fn model_display_name(name_or_path: &str) -> String {
    let path = Path::new(name_or_path);
    path.parent()
        .and_then(Path::file_name)
        .or_else(|| path.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| name_or_path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names() {
        assert_eq!(model_display_name("glm-edge-v-2b/INT4"), "glm-edge-v-2b");
        assert_eq!(
            model_display_name("/models/glm-edge-v-5b/FP16"),
            "glm-edge-v-5b"
        );
        assert_eq!(model_display_name("glm-edge-v-2b"), "glm-edge-v-2b");
        assert_eq!(model_display_name(""), "");
    }

    #[test]
    fn examples_become_messages() {
        let examples = default_examples(Path::new("assets"));
        let message = examples[1].to_message();
        assert_eq!(message.text, "What does the chart display?");
        assert_eq!(message.last_file(), Some(Path::new("assets/chart.png")));
    }
}
