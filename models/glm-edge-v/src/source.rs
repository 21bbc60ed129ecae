use std::path::PathBuf;

use vision_chat_common::FileSource;

/// Where the files describing a GLM-Edge-V model come from.
///
/// The weights themselves stay with the generation server, this only covers the tokenizer and
/// the image preprocessing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlmEdgeVSource {
    pub(crate) name_or_path: String,
    pub(crate) tokenizer: FileSource,
    pub(crate) tokenizer_config: FileSource,
    pub(crate) preprocessor_config: FileSource,
}

impl GlmEdgeVSource {
    /// Create a new source from the individual files.
    pub fn new(
        name_or_path: impl ToString,
        tokenizer: FileSource,
        tokenizer_config: FileSource,
        preprocessor_config: FileSource,
    ) -> Self {
        Self {
            name_or_path: name_or_path.to_string(),
            tokenizer,
            tokenizer_config,
            preprocessor_config,
        }
    }

    /// A model hosted on Hugging Face.
    pub fn huggingface(model_id: impl ToString, revision: impl ToString) -> Self {
        let model_id = model_id.to_string();
        let revision = revision.to_string();
        let file = |name: &str| FileSource::huggingface(&model_id, &revision, name);
        Self {
            name_or_path: format!("{model_id}/{revision}"),
            tokenizer: file("tokenizer.json"),
            tokenizer_config: file("tokenizer_config.json"),
            preprocessor_config: file("preprocessor_config.json"),
        }
    }

    /// A model that was exported to a local directory.
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let file = |name: &str| FileSource::local(dir.join(name));
        Self {
            name_or_path: dir.display().to_string(),
            tokenizer: file("tokenizer.json"),
            tokenizer_config: file("tokenizer_config.json"),
            preprocessor_config: file("preprocessor_config.json"),
        }
    }

    /// A preset for GLM-Edge-V 2B
    pub fn glm_edge_v_2b() -> Self {
        Self::huggingface("THUDM/glm-edge-v-2b", "main")
    }

    /// A preset for GLM-Edge-V 5B
    pub fn glm_edge_v_5b() -> Self {
        Self::huggingface("THUDM/glm-edge-v-5b", "main")
    }

    /// The path or id the model is known by.
    pub fn name_or_path(&self) -> &str {
        &self.name_or_path
    }

    /// Override the path or id the model is known by.
    pub fn with_name_or_path(mut self, name_or_path: impl ToString) -> Self {
        self.name_or_path = name_or_path.to_string();
        self
    }

    /// Every file the source needs.
    pub fn files(&self) -> [&FileSource; 3] {
        [
            &self.tokenizer,
            &self.tokenizer_config,
            &self.preprocessor_config,
        ]
    }
}

impl Default for GlmEdgeVSource {
    fn default() -> Self {
        Self::glm_edge_v_2b()
    }
}
