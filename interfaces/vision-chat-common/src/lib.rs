//! Shared plumbing for the vision chat crates: where files come from, how they are cached locally,
//! how download progress is reported, and the example assets the demo ships with.

#![warn(missing_docs)]

use std::{fmt::Display, path::PathBuf};

mod assets;
pub use assets::*;
mod cache;
pub use cache::*;
mod progress;
pub use progress::*;

/// A source for a file, either from Hugging Face, a plain URL or a local path
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileSource {
    /// A file from Hugging Face
    HuggingFace {
        /// The model id to use
        model_id: String,
        /// The revision to use
        revision: String,
        /// The file to use
        file: String,
    },
    /// A file served over plain HTTP(S)
    Url(String),
    /// A local file
    Local(PathBuf),
}

impl Display for FileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileSource::HuggingFace {
                model_id,
                revision,
                file,
            } => write!(f, "hf://{}/{}/{}", model_id, revision, file),
            FileSource::Url(url) => write!(f, "{url}"),
            FileSource::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

impl FileSource {
    /// Create a new source for a file from Hugging Face
    pub fn huggingface(
        model_id: impl ToString,
        revision: impl ToString,
        file: impl ToString,
    ) -> Self {
        Self::HuggingFace {
            model_id: model_id.to_string(),
            revision: revision.to_string(),
            file: file.to_string(),
        }
    }

    /// Create a new source for a file behind a URL
    pub fn url(url: impl ToString) -> Self {
        Self::Url(url.to_string())
    }

    /// Create a new source for a local file
    pub fn local(path: PathBuf) -> Self {
        Self::Local(path)
    }

    /// The file name of the source, without any directories.
    pub fn file_name(&self) -> Option<&str> {
        match self {
            FileSource::HuggingFace { file, .. } => file.rsplit('/').next(),
            FileSource::Url(url) => url
                .split(['?', '#'])
                .next()
                .and_then(|path| path.rsplit('/').next())
                .filter(|name| !name.is_empty()),
            FileSource::Local(path) => path.file_name().and_then(|name| name.to_str()),
        }
    }
}
