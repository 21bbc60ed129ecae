use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};
use glm_edge_v::{GlmEdgeV, GlmEdgeVBuilder, GlmEdgeVSource, ModelLoadingProgress};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};
use vision_chat::{default_examples, GenerationParameters};
use vision_chat_common::{default_example_assets, prefetch_assets};

mod server;
mod terminal;
#[cfg(test)]
mod testing;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    model: ModelArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download the example images and the model files
    Prefetch,
    /// Chat about an image in the terminal
    Chat,
    /// Serve the chat over HTTP
    Serve {
        /// The address to listen on
        #[arg(long, env = "VISION_CHAT_ADDR", default_value = "127.0.0.1:7860")]
        addr: SocketAddr,
    },
}

#[derive(Args, Debug, Clone, PartialEq)]
struct ModelArgs {
    /// The Hugging Face repository of the model
    #[arg(long, global = true, env = "VISION_CHAT_MODEL_ID", default_value = "THUDM/glm-edge-v-2b")]
    model_id: String,
    /// The revision of the repository
    #[arg(long, global = true, env = "VISION_CHAT_REVISION", default_value = "main")]
    revision: String,
    /// A local directory with the model files, used instead of the repository
    #[arg(long, global = true, env = "VISION_CHAT_MODEL_DIR")]
    model_dir: Option<PathBuf>,
    /// The generation server
    #[arg(long, global = true, env = "VISION_CHAT_ENDPOINT", default_value = glm_edge_v::DEFAULT_ENDPOINT)]
    endpoint: String,
    /// Where the example images are stored
    #[arg(long, global = true, env = "VISION_CHAT_ASSETS_DIR", default_value = ".")]
    assets_dir: PathBuf,
    /// The maximum number of tokens to generate
    #[arg(long, global = true, env = "VISION_CHAT_MAX_NEW_TOKENS", default_value_t = 1024)]
    max_new_tokens: u32,
    /// The sampling temperature
    #[arg(long, global = true, env = "VISION_CHAT_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,
    /// Sample instead of decoding greedily
    #[arg(long, global = true, env = "VISION_CHAT_DO_SAMPLE")]
    do_sample: bool,
    /// How many seconds to wait for the next piece of text
    #[arg(long, global = true, env = "VISION_CHAT_TIMEOUT_SECS", default_value_t = 60)]
    timeout_secs: u64,
}

impl ModelArgs {
    fn source(&self) -> GlmEdgeVSource {
        match &self.model_dir {
            Some(dir) => GlmEdgeVSource::from_dir(dir),
            None => GlmEdgeVSource::huggingface(&self.model_id, &self.revision),
        }
    }

    fn parameters(&self) -> GenerationParameters {
        GenerationParameters::default()
            .with_max_new_tokens(self.max_new_tokens)
            .with_temperature(self.temperature)
            .with_do_sample(self.do_sample)
            .with_timeout(Duration::from_secs(self.timeout_secs))
    }

    fn builder(&self) -> GlmEdgeVBuilder {
        GlmEdgeV::builder()
            .with_source(self.source())
            .with_endpoint(&self.endpoint)
            .with_parameters(self.parameters())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    let model = args.model;

    prefetch_assets(&model.assets_dir, &default_example_assets()).await?;
    let examples = default_examples(&model.assets_dir);

    match args.command {
        Commands::Prefetch => {
            model
                .builder()
                .prefetch_with_loading_handler(ModelLoadingProgress::multi_bar_loading_indicator())
                .await?;
            tracing::info!("Everything is downloaded");
        }
        Commands::Chat => {
            let bot = model.builder().build().await?;
            terminal::run(bot, examples).await?;
        }
        Commands::Serve { addr } => {
            let bot = model.builder().build().await?;
            server::serve(addr, bot, examples).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_match_the_demo() {
        let cli = Cli::try_parse_from(["vision-chat", "chat"]).unwrap();
        assert!(matches!(cli.command, Commands::Chat));
        assert_eq!(cli.model.parameters(), GenerationParameters::default());
        assert_eq!(cli.model.source(), GlmEdgeVSource::glm_edge_v_2b());
    }

    #[test]
    fn model_args_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "vision-chat",
            "serve",
            "--addr",
            "0.0.0.0:8080",
            "--model-dir",
            "models/glm-edge-v-5b/INT4",
            "--max-new-tokens",
            "64",
            "--do-sample",
        ])
        .unwrap();
        let Commands::Serve { addr } = cli.command else {
            panic!("expected the serve command");
        };
        assert_eq!(addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(
            cli.model.source(),
            GlmEdgeVSource::from_dir("models/glm-edge-v-5b/INT4")
        );
        let parameters = cli.model.parameters();
        assert_eq!(parameters.max_new_tokens, 64);
        assert!(parameters.do_sample);
    }
}
