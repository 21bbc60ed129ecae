use crate::BoxedError;
use std::path::PathBuf;

/// An error that stops a response before generation starts.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// No image was uploaded with the message or earlier in the chat.
    #[error("You need to upload an image for {model_name} to work. Close the error and try again with an Image.")]
    MissingImage {
        /// The name of the model shown to the user
        model_name: String,
    },
    /// The chat template could not be applied to the conversation.
    #[error("Failed to apply the chat template: {0}")]
    Template(#[source] BoxedError),
    /// The uploaded image could not be opened.
    #[error("Failed to open image {path}: {source}")]
    Image {
        /// The path of the image
        path: PathBuf,
        /// The underlying error
        #[source]
        source: image::ImageError,
    },
    /// The image processor rejected the image.
    #[error("Failed to preprocess the image: {0}")]
    Processor(#[source] BoxedError),
    /// The generation thread could not be started.
    #[error("Failed to start generation: {0}")]
    Spawn(#[from] std::io::Error),
}

impl ChatError {
    /// Returns true if the error should be shown to the user as is, rather than as a failure of
    /// the demo.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, ChatError::MissingImage { .. })
    }
}
