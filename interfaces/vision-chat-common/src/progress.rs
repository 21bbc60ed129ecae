/// The progress of preparing a model's collaborators
#[derive(Clone, Debug)]
pub enum ModelLoadingProgress {
    /// A file is downloading
    Downloading {
        /// The source of the download. This is not a path or URL, but a description of the source
        source: String,
        /// How far along the download is
        progress: FileLoadingProgress,
    },
    /// The files are being loaded
    Loading {
        /// The progress of the loading, from 0 to 1
        progress: f32,
    },
}

/// The progress of a file download
#[derive(Clone, Debug)]
pub struct FileLoadingProgress {
    /// The time stamp the download started
    pub start_time: std::time::Instant,
    /// The size of the cached part of the download in bytes
    pub cached_size: u64,
    /// The size of the download in bytes
    pub size: u64,
    /// The progress of the download in bytes, from 0 to size
    pub progress: u64,
}

impl ModelLoadingProgress {
    /// Create a new downloading progress
    pub fn downloading(source: String, file_loading_progress: FileLoadingProgress) -> Self {
        Self::Downloading {
            source,
            progress: file_loading_progress,
        }
    }

    /// Create a function that maps file progress for `source` into model progress
    pub fn downloading_progress(
        source: String,
    ) -> impl FnMut(FileLoadingProgress) -> Self + Send + Sync {
        move |progress| ModelLoadingProgress::downloading(source.clone(), progress)
    }

    /// Create a new loading progress
    pub fn loading(progress: f32) -> Self {
        Self::Loading { progress }
    }

    /// Return the fraction complete, from 0 to 1
    pub fn progress(&self) -> f32 {
        match self {
            Self::Downloading {
                progress:
                    FileLoadingProgress {
                        progress,
                        size,
                        cached_size,
                        ..
                    },
                ..
            } => {
                let remaining = size.saturating_sub(*cached_size);
                if remaining == 0 {
                    1.0
                } else {
                    progress.saturating_sub(*cached_size) as f32 / remaining as f32
                }
            }
            Self::Loading { progress } => *progress,
        }
    }

    #[cfg(feature = "loading-progress-bar")]
    /// A default loading progress bar
    pub fn multi_bar_loading_indicator() -> impl FnMut(ModelLoadingProgress) + Send + Sync + 'static
    {
        use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
        use std::collections::HashMap;
        let m = MultiProgress::new();
        let sty = ProgressStyle::with_template(
            "{spinner:.green} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] ({decimal_bytes_per_sec}, ETA {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        let mut progress_bars = HashMap::new();

        move |progress| match progress {
            Self::Downloading {
                source,
                progress:
                    FileLoadingProgress {
                        progress,
                        size,
                        cached_size,
                        ..
                    },
            } => {
                let progress_bar = progress_bars.entry(source.clone()).or_insert_with(|| {
                    let pb = m.add(ProgressBar::new(size));
                    pb.set_message(format!("Downloading {source}"));
                    pb.set_style(sty.clone());
                    pb.set_position(cached_size);
                    pb
                });

                progress_bar.set_position(progress);
            }
            ModelLoadingProgress::Loading { progress } => {
                for pb in progress_bars.values_mut() {
                    pb.finish();
                }
                let progress = progress * 100.;
                let _ = m.println(format!("Loading {progress:.2}%"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resumed_download_progress_ignores_cached_bytes() {
        let progress = ModelLoadingProgress::downloading(
            "tokenizer.json".to_string(),
            FileLoadingProgress {
                start_time: std::time::Instant::now(),
                cached_size: 50,
                size: 150,
                progress: 100,
            },
        );
        assert_eq!(progress.progress(), 0.5);
    }

    #[test]
    fn fully_cached_download_is_complete() {
        let progress = ModelLoadingProgress::downloading(
            "tokenizer.json".to_string(),
            FileLoadingProgress {
                start_time: std::time::Instant::now(),
                cached_size: 10,
                size: 10,
                progress: 10,
            },
        );
        assert_eq!(progress.progress(), 1.0);
    }
}
