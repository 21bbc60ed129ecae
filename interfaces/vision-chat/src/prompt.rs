//! Turning the chat history and a new message into the conversation the chat template renders.

use crate::{ChatMessage, ConversationEntry, Turn};
use std::path::PathBuf;

/// Where the image the model will look at came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageOrigin {
    /// Uploaded with the new message
    Message,
    /// Uploaded in the turn at this index of the history
    History(usize),
}

/// The image the model will look at for this response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveImage {
    /// The local path of the image
    pub path: PathBuf,
    /// Where the image came from
    pub origin: ImageOrigin,
}

/// Find the image for this response.
///
/// The last file of the new message wins. Without one, the most recent file tuple in the history
/// is used. Returns `None` if the user never uploaded an image.
pub fn resolve_image(message: &ChatMessage, history: &[Turn]) -> Option<ActiveImage> {
    if let Some(path) = message.last_file() {
        return Some(ActiveImage {
            path: path.to_path_buf(),
            origin: ImageOrigin::Message,
        });
    }
    history
        .iter()
        .enumerate()
        .rev()
        .find_map(|(index, turn)| {
            turn.user.file().map(|path| ActiveImage {
                path: path.to_path_buf(),
                origin: ImageOrigin::History(index),
            })
        })
}

#[derive(Default)]
struct OpenTurn {
    text: String,
    image: bool,
}

impl OpenTurn {
    fn merge(&mut self, text: &str, image: bool) {
        if !text.is_empty() {
            if !self.text.is_empty() {
                self.text.push('\n');
            }
            self.text.push_str(text);
        }
        self.image |= image;
    }

    fn into_entry(self) -> ConversationEntry {
        if self.image {
            ConversationEntry::user_with_image(self.text)
        } else {
            ConversationEntry::user(self.text)
        }
    }
}

/// Build the role tagged conversation for the chat template.
///
/// Answered turns become a user entry followed by an assistant entry. A turn without an answer is
/// still open: the user text of the following turns is merged into it until an answer closes it,
/// and an open turn left at the end of the history is merged with the new message. The image
/// placeholder is emitted once, in front of the text of the user entry that introduced `image`.
/// The new message is always the last entry.
pub fn build_conversation(
    history: &[Turn],
    message: &ChatMessage,
    image: &ActiveImage,
) -> Vec<ConversationEntry> {
    let mut conversation = Vec::with_capacity(history.len() * 2 + 1);
    let mut open: Option<OpenTurn> = None;

    for (index, turn) in history.iter().enumerate() {
        let carries_image = image.origin == ImageOrigin::History(index);
        match &turn.assistant {
            None => {
                open.get_or_insert_with(OpenTurn::default)
                    .merge(turn.user.text(), carries_image);
            }
            Some(answer) => {
                let mut user = open.take().unwrap_or_default();
                user.merge(turn.user.text(), carries_image);
                conversation.push(user.into_entry());
                conversation.push(ConversationEntry::assistant(answer));
            }
        }
    }

    let mut last = open.take().unwrap_or_default();
    last.merge(&message.text, image.origin == ImageOrigin::Message);
    conversation.push(last.into_entry());

    conversation
}
