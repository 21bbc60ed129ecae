use serde::{Deserialize, Serialize};

/// The role of an entry in a conversation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// A system prompt.
    #[serde(rename = "system")]
    System,
    /// A user message.
    #[serde(rename = "user")]
    User,
    /// A model answer.
    #[serde(rename = "assistant")]
    Assistant,
}

/// A chunk of content in a conversation entry. Serialized the way chat templates expect it:
/// `{"type": "image"}` or `{"type": "text", "text": "..."}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentChunk {
    /// The place the image goes. The template expands it into the model's image tokens.
    Image,
    /// A text chunk.
    Text {
        /// The text of the chunk
        text: String,
    },
}

impl ContentChunk {
    /// Create a text chunk.
    pub fn text(text: impl ToString) -> Self {
        ContentChunk::Text {
            text: text.to_string(),
        }
    }
}

/// A single role tagged entry of the conversation handed to the chat template.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    /// Who the entry is from
    pub role: Role,
    /// The chunks of the entry, in order
    pub content: Vec<ContentChunk>,
}

impl ConversationEntry {
    /// A user entry with a single text chunk.
    pub fn user(text: impl ToString) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentChunk::text(text)],
        }
    }

    /// A user entry with the image placeholder followed by a text chunk.
    pub fn user_with_image(text: impl ToString) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentChunk::Image, ContentChunk::text(text)],
        }
    }

    /// An assistant entry with a single text chunk.
    pub fn assistant(text: impl ToString) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentChunk::text(text)],
        }
    }

    /// Returns true if the entry holds the image placeholder.
    pub fn has_image(&self) -> bool {
        self.content
            .iter()
            .any(|chunk| matches!(chunk, ContentChunk::Image))
    }

    /// The text chunks of the entry joined together.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|chunk| match chunk {
                ContentChunk::Text { text } => Some(text.as_str()),
                ContentChunk::Image => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_serialize_for_chat_templates() {
        let entry = ConversationEntry::user_with_image("What is the text saying?");
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            serde_json::json!({
                "role": "user",
                "content": [
                    {"type": "image"},
                    {"type": "text", "text": "What is the text saying?"}
                ]
            })
        );
        assert!(entry.has_image());
        assert!(!ConversationEntry::assistant("Hi").has_image());
    }
}
