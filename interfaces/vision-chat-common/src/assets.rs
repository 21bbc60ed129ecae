use std::path::{Path, PathBuf};

/// An error that can occur while fetching an example asset.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    /// The asset could not be downloaded.
    #[error("Failed to download {url}: {source}")]
    Http {
        /// The url of the asset
        url: String,
        /// The underlying error
        #[source]
        source: reqwest::Error,
    },
    /// The downloaded bytes were not an image, or the image could not be written.
    #[error("Failed to store {path}: {source}")]
    Image {
        /// Where the asset was going to be stored
        path: PathBuf,
        /// The underlying error
        #[source]
        source: image::ImageError,
    },
    /// The directory for the assets could not be created.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The task decoding the image panicked or was cancelled.
    #[error("Image task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// An image the demo offers as an example, stored under `file_name` once fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExampleAsset {
    /// Where to download the image from
    pub url: String,
    /// The file name to store the image under
    pub file_name: String,
}

impl ExampleAsset {
    /// Create a new example asset
    pub fn new(url: impl ToString, file_name: impl ToString) -> Self {
        Self {
            url: url.to_string(),
            file_name: file_name.to_string(),
        }
    }

    /// The path the asset is stored at inside `dir`
    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(&self.file_name)
    }
}

/// The example images shown next to the chat: a small text snippet and a chart.
pub fn default_example_assets() -> Vec<ExampleAsset> {
    vec![
        ExampleAsset::new(
            "https://github.com/openvinotoolkit/openvino_notebooks/assets/29454499/dd5105d6-6a64-4935-8a34-3058a82c8d5d",
            "small.png",
        ),
        ExampleAsset::new(
            "https://github.com/openvinotoolkit/openvino_notebooks/assets/29454499/1221e2a8-a6da-413a-9af6-f04d56af3754",
            "chart.png",
        ),
    ]
}

/// Make sure every asset exists in `dir`, downloading the missing ones.
///
/// Files that already exist are left untouched. Downloaded bytes are decoded as an image and
/// saved in the format implied by the file extension. Returns the local path of every asset in
/// the order they were given.
pub async fn prefetch_assets(
    dir: &Path,
    assets: &[ExampleAsset],
) -> Result<Vec<PathBuf>, AssetError> {
    let mut paths = Vec::with_capacity(assets.len());
    let mut client = None;
    for asset in assets {
        let path = asset.path_in(dir);
        if path.exists() {
            tracing::trace!("Example asset {} already present", path.display());
            paths.push(path);
            continue;
        }

        tokio::fs::create_dir_all(dir).await?;
        let client = client.get_or_insert_with(reqwest::Client::new);
        tracing::info!("Downloading example asset {} from {}", asset.file_name, asset.url);
        let bytes = fetch_bytes(client, &asset.url)
            .await
            .map_err(|source| AssetError::Http {
                url: asset.url.clone(),
                source,
            })?;

        let target = path.clone();
        tokio::task::spawn_blocking(move || {
            image::load_from_memory(&bytes)
                .and_then(|image| image.save(&target))
                .map_err(|source| AssetError::Image {
                    path: target,
                    source,
                })
        })
        .await??;

        paths.push(path);
    }
    Ok(paths)
}

async fn fetch_bytes(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, reqwest::Error> {
    let response = client.get(url).send().await?.error_for_status()?;
    Ok(response.bytes().await?.to_vec())
}
