use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A file attached to a chat message. Chat frontends send either a bare path or an object with a
/// `path` field (and possibly other metadata, which is ignored).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileRef {
    /// A bare path to the uploaded file
    Path(PathBuf),
    /// An uploaded file description
    Object {
        /// The path to the uploaded file
        path: PathBuf,
    },
}

impl FileRef {
    /// The local path of the file.
    pub fn path(&self) -> &Path {
        match self {
            FileRef::Path(path) => path,
            FileRef::Object { path } => path,
        }
    }
}

impl From<PathBuf> for FileRef {
    fn from(path: PathBuf) -> Self {
        FileRef::Path(path)
    }
}

impl From<&str> for FileRef {
    fn from(path: &str) -> Self {
        FileRef::Path(PathBuf::from(path))
    }
}

/// A new message from the user: some text and any files uploaded with it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The text of the message
    #[serde(default)]
    pub text: String,
    /// The files uploaded with the message, oldest first
    #[serde(default)]
    pub files: Vec<FileRef>,
}

impl ChatMessage {
    /// Create a text only message.
    pub fn new(text: impl ToString) -> Self {
        Self {
            text: text.to_string(),
            files: Vec::new(),
        }
    }

    /// Attach a file to the message.
    pub fn with_file(mut self, file: impl Into<FileRef>) -> Self {
        self.files.push(file.into());
        self
    }

    /// The most recently attached file, if any.
    pub fn last_file(&self) -> Option<&Path> {
        self.files.last().map(FileRef::path)
    }
}

/// The user side of a turn in the chat history.
///
/// Uploaded files are kept in the history as their own turn holding a tuple of paths, followed by
/// the turn with the text that was sent along with them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserEntry {
    /// A text message
    Text(String),
    /// A tuple of uploaded files
    Files(Vec<PathBuf>),
}

impl UserEntry {
    /// The text of the entry. File entries have no text.
    pub fn text(&self) -> &str {
        match self {
            UserEntry::Text(text) => text,
            UserEntry::Files(_) => "",
        }
    }

    /// The first file of a file tuple.
    pub fn file(&self) -> Option<&Path> {
        match self {
            UserEntry::Text(_) => None,
            UserEntry::Files(files) => files.first().map(PathBuf::as_path),
        }
    }
}

impl From<&str> for UserEntry {
    fn from(text: &str) -> Self {
        UserEntry::Text(text.to_string())
    }
}

impl From<String> for UserEntry {
    fn from(text: String) -> Self {
        UserEntry::Text(text)
    }
}

impl From<PathBuf> for UserEntry {
    fn from(path: PathBuf) -> Self {
        UserEntry::Files(vec![path])
    }
}

/// One (user, assistant) exchange in the chat history. The assistant side is missing while the
/// turn is still in progress.
///
/// Serialized as a two element array, `[user, assistant]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(UserEntry, Option<String>)", into = "(UserEntry, Option<String>)")]
pub struct Turn {
    /// What the user sent
    pub user: UserEntry,
    /// What the model answered
    pub assistant: Option<String>,
}

impl Turn {
    /// A finished turn.
    pub fn new(user: impl Into<UserEntry>, assistant: impl ToString) -> Self {
        Self {
            user: user.into(),
            assistant: Some(assistant.to_string()),
        }
    }

    /// A turn the assistant has not answered.
    pub fn in_progress(user: impl Into<UserEntry>) -> Self {
        Self {
            user: user.into(),
            assistant: None,
        }
    }

    /// Returns true if the assistant has not answered this turn.
    pub fn is_in_progress(&self) -> bool {
        self.assistant.is_none()
    }
}

impl From<(UserEntry, Option<String>)> for Turn {
    fn from((user, assistant): (UserEntry, Option<String>)) -> Self {
        Self { user, assistant }
    }
}

impl From<Turn> for (UserEntry, Option<String>) {
    fn from(turn: Turn) -> Self {
        (turn.user, turn.assistant)
    }
}

/// The chat so far, oldest turn first.
pub type History = Vec<Turn>;

/// Record a finished exchange in the history the way a chat frontend does: uploaded files get
/// their own in-progress turn, followed by the text and the answer.
pub fn record_exchange(history: &mut History, message: &ChatMessage, answer: impl ToString) {
    for file in &message.files {
        history.push(Turn::in_progress(file.path().to_path_buf()));
    }
    history.push(Turn::new(message.text.clone(), answer));
}
