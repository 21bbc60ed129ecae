use crate::{FileLoadingProgress, FileSource};
use hf_hub::{Repo, RepoType};
use httpdate::parse_http_date;
use reqwest::{
    header::{HeaderValue, CONTENT_LENGTH, LAST_MODIFIED, RANGE},
    IntoUrl,
};
use reqwest::{Response, StatusCode};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// An error that can occur while resolving a [`FileSource`] to a local path.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The Hugging Face API could not be reached or configured.
    #[error("Hugging Face API error: {0}")]
    HuggingFaceApi(#[from] hf_hub::api::sync::ApiError),
    /// The metadata of a previously downloaded file could not be read.
    #[error("Unable to get file metadata for {0}: {1}")]
    UnableToGetFileMetadata(PathBuf, #[source] tokio::io::Error),
    /// A local file does not exist.
    #[error("Local file {0} does not exist")]
    MissingLocalFile(PathBuf),
    /// The source does not name a file that could be stored.
    #[error("Unable to determine a file name for {0}")]
    NoFileName(String),
    /// Reading or writing the cache failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The download failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The server answered with a status other than 200 or 206.
    #[error("Unexpected status code: {0}")]
    UnexpectedStatusCode(StatusCode),
}

/// A local cache of downloaded files.
#[derive(Debug, Clone)]
pub struct Cache {
    location: PathBuf,
    /// The huggingface token to use (defaults to the token set with `huggingface-cli login`)
    huggingface_token: Option<String>,
}

impl Cache {
    /// Create a new cache with a specific location
    pub fn new(location: PathBuf) -> Self {
        Self {
            location,
            huggingface_token: None,
        }
    }

    /// Set the Hugging Face token to use for downloading (defaults to the token set with `huggingface-cli login`, and then the environment variable `HF_TOKEN`)
    pub fn with_huggingface_token(mut self, token: Option<String>) -> Self {
        self.huggingface_token = token;
        self
    }

    /// The directory files are cached in.
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// The path a source is (or would be) stored at.
    pub fn path_for(&self, source: &FileSource) -> Result<PathBuf, CacheError> {
        match source {
            FileSource::HuggingFace {
                model_id,
                revision,
                file,
            } => Ok(self.location.join(model_id).join(revision).join(file)),
            FileSource::Url(url) => {
                let url = reqwest::Url::parse(url)
                    .map_err(|_| CacheError::NoFileName(url.to_string()))?;
                let file_name = source
                    .file_name()
                    .ok_or_else(|| CacheError::NoFileName(url.to_string()))?;
                let host = url.host_str().unwrap_or("unknown-host");
                Ok(self.location.join("urls").join(host).join(file_name))
            }
            FileSource::Local(path) => Ok(path.clone()),
        }
    }

    /// Get the file from the cache, downloading it if necessary
    pub async fn get(
        &self,
        source: &FileSource,
        progress: impl FnMut(FileLoadingProgress),
    ) -> Result<PathBuf, CacheError> {
        match source {
            FileSource::HuggingFace {
                model_id,
                revision,
                file,
            } => {
                let token = self.huggingface_token.clone().or_else(huggingface_token);
                let repo = Repo::with_revision(
                    model_id.to_string(),
                    RepoType::Model,
                    revision.to_string(),
                );
                let api = hf_hub::api::sync::Api::new()?.repo(repo);
                let url = api.url(file);
                self.fetch(&url, self.path_for(source)?, token, progress)
                    .await
            }
            FileSource::Url(url) => {
                self.fetch(url, self.path_for(source)?, None, progress)
                    .await
            }
            FileSource::Local(path) => {
                if path.exists() {
                    Ok(path.clone())
                } else {
                    Err(CacheError::MissingLocalFile(path.clone()))
                }
            }
        }
    }

    async fn fetch(
        &self,
        url: &str,
        complete_download: PathBuf,
        token: Option<String>,
        progress: impl FnMut(FileLoadingProgress),
    ) -> Result<PathBuf, CacheError> {
        let client = reqwest::Client::new();
        tracing::trace!("Fetching metadata for {} from {url}", complete_download.display());
        let response = client
            .head(url)
            .with_authorization_header(token.clone())
            .send()
            .await;

        if complete_download.exists() {
            let metadata = tokio::fs::metadata(&complete_download)
                .await
                .map_err(|e| CacheError::UnableToGetFileMetadata(complete_download.clone(), e))?;
            let file_last_modified = metadata.modified()?;
            // If the server says the file hasn't been modified since we downloaded it, we can use the local file
            if let Some(last_updated) = response
                .as_ref()
                .ok()
                .and_then(|response| response.headers().get(LAST_MODIFIED))
                .and_then(|last_updated| last_updated.to_str().ok())
                .and_then(|s| parse_http_date(s).ok())
            {
                if last_updated <= file_last_modified {
                    return Ok(complete_download);
                }
            } else {
                // Or if we are offline, we can use the local file
                return Ok(complete_download);
            }
        }

        let file_name = complete_download
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| CacheError::NoFileName(url.to_string()))?;
        let incomplete_download = complete_download.with_file_name(format!("{file_name}.partial"));

        tracing::trace!("Downloading into {:?}", incomplete_download);

        download_into(
            url,
            &incomplete_download,
            response?,
            client,
            token,
            progress,
        )
        .await?;

        // Rename the file to remove the .partial extension
        tokio::fs::rename(&incomplete_download, &complete_download).await?;

        Ok(complete_download)
    }
}

impl Default for Cache {
    fn default() -> Self {
        let location = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("vision-chat")
            .join("cache");
        Self::new(location)
    }
}

async fn download_into<U: IntoUrl>(
    url: U,
    file: &Path,
    head: Response,
    client: reqwest::Client,
    token: Option<String>,
    mut progress: impl FnMut(FileLoadingProgress),
) -> Result<(), CacheError> {
    let length = head
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|length| length.to_str().ok())
        .and_then(|s| u64::from_str(s).ok());

    // Without a known length a partial file can't be resumed, so start over
    let (mut start, mut output_file) = match (tokio::fs::metadata(file).await, length) {
        (Ok(metadata), Some(length)) if metadata.len() <= length => {
            let start = metadata.len();
            let output_file = OpenOptions::new().append(true).open(file).await?;
            (start, output_file)
        }
        _ => {
            if let Some(parent) = file.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            (0, File::create(file).await?)
        }
    };

    let start_time = std::time::Instant::now();
    if let Some(length) = length {
        progress(FileLoadingProgress {
            progress: start,
            cached_size: start,
            size: length,
            start_time,
        });
    }

    if Some(start) == length {
        tracing::trace!("File {} already downloaded", file.display());
        return Ok(());
    }

    let range = length
        .filter(|length| start > 0 && start < *length)
        .and_then(|length| HeaderValue::from_str(&format!("bytes={}-{}", start, length - 1)).ok());

    tracing::trace!("Fetching range {:?}", range);
    let mut request = client.get(url).with_authorization_header(token);
    if let Some(range) = range {
        request = request.header(RANGE, range);
    }
    let mut response = request.send().await?;

    let status = response.status();
    if !(status == StatusCode::OK || status == StatusCode::PARTIAL_CONTENT) {
        return Err(CacheError::UnexpectedStatusCode(status));
    }
    // The server ignored the range and is sending the whole file
    if status == StatusCode::OK && start > 0 {
        tracing::trace!("Range ignored, restarting {}", file.display());
        output_file.set_len(0).await?;
        start = 0;
    }

    let mut current_progress = start;

    while let Some(chunk) = response.chunk().await? {
        output_file.write_all(&chunk).await?;
        tracing::trace!("wrote chunk of size {}", chunk.len());
        current_progress += chunk.len() as u64;
        if let Some(length) = length {
            progress(FileLoadingProgress {
                progress: current_progress,
                cached_size: start,
                size: length,
                start_time,
            });
        }
    }
    output_file.flush().await?;

    tracing::trace!("Download of {} complete", file.display());

    Ok(())
}

trait RequestBuilderExt {
    fn with_authorization_header(self, token: Option<String>) -> Self;
}

impl RequestBuilderExt for reqwest::RequestBuilder {
    fn with_authorization_header(self, token: Option<String>) -> Self {
        if let Some(token) = token {
            self.header(reqwest::header::AUTHORIZATION, format!("Bearer {token}"))
        } else {
            self
        }
    }
}

fn huggingface_token() -> Option<String> {
    let cache = hf_hub::Cache::default();
    cache.token().or_else(|| std::env::var("HF_TOKEN").ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn cache_layout() {
        let cache = Cache::new(PathBuf::from("/cache"));
        assert_eq!(
            cache
                .path_for(&FileSource::huggingface(
                    "THUDM/glm-edge-v-2b",
                    "main",
                    "tokenizer.json"
                ))
                .unwrap(),
            PathBuf::from("/cache/THUDM/glm-edge-v-2b/main/tokenizer.json")
        );
        assert_eq!(
            cache
                .path_for(&FileSource::url("https://example.com/files/chart.png"))
                .unwrap(),
            PathBuf::from("/cache/urls/example.com/chart.png")
        );
        assert!(cache.path_for(&FileSource::url("not a url")).is_err());
    }

    #[tokio::test]
    async fn local_sources_resolve_without_network() {
        let dir = std::env::temp_dir().join(format!("vision-chat-cache-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("tokenizer.json");
        std::fs::write(&file, "{}").unwrap();

        let cache = Cache::new(dir.join("cache"));
        let resolved = cache
            .get(&FileSource::local(file.clone()), |_| {})
            .await
            .unwrap();
        assert_eq!(resolved, file);

        let missing = cache
            .get(&FileSource::local(dir.join("missing.json")), |_| {})
            .await;
        assert!(matches!(missing, Err(CacheError::MissingLocalFile(_))));

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn ignored_range_restarts_the_partial_file() {
        let app = axum::Router::new()
            .route("/tokenizer.json", axum::routing::get(|| async { "0123456789" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });

        let dir = std::env::temp_dir().join(format!(
            "vision-chat-cache-range-{}",
            std::process::id()
        ));
        let cache = Cache::new(dir.clone());
        let source = FileSource::url(format!("http://{addr}/tokenizer.json"));
        let path = cache.path_for(&source).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path.with_file_name("tokenizer.json.partial"), "0123").unwrap();

        let mut reported = Vec::new();
        let downloaded = cache
            .get(&source, |progress| reported.push(progress.progress))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&downloaded).unwrap(), "0123456789");
        assert_eq!(reported.last(), Some(&10));

        std::fs::remove_dir_all(dir).unwrap();
    }
}
