use clap::{Parser, Subcommand};

use vox_relay_core::config::Config;

mod logging;
#[cfg(feature = "metrics")]
mod metrics;
mod relay;

#[derive(Parser)]
#[command(
    name = "vox-relay",
    about = "Real-time duplex audio relay between a voice channel and a streaming AI voice endpoint",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a relay against the configured endpoint with a synthetic transport
    Relay {
        /// How long to stream before leaving
        #[arg(long, default_value_t = 10)]
        seconds: u64,

        /// Endpoint provider (gemini, echo)
        #[arg(long)]
        provider: Option<String>,

        /// Prebuilt voice name
        #[arg(long)]
        voice: Option<String>,

        /// Model to use
        #[arg(long)]
        model: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show configuration status
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
    /// Check the configuration for problems
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config
    let config_path = cli
        .config
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::default_path);

    let config = Config::load(&config_path)?;

    logging::init(config.logging.as_ref(), cli.verbose)?;

    match cli.command {
        Commands::Relay {
            seconds,
            provider,
            voice,
            model,
        } => {
            relay::run(
                &config,
                relay::RelayArgs {
                    seconds,
                    provider,
                    voice,
                    model,
                },
            )
            .await?;
        }
        Commands::Status => {
            let endpoint = config.endpoint();
            let relay = config.relay();
            println!("vox-relay v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            println!("Provider: {}", endpoint.provider);
            println!("Model: {}", endpoint.model);
            println!("Voice: {}", endpoint.voice);
            if endpoint.is_remote() {
                let key = if endpoint.resolve_api_key().is_some() {
                    "set"
                } else {
                    "missing"
                };
                println!("API key: {key}");
            }
            println!(
                "Audio: transport {} Hz, endpoint in {} Hz / out {} Hz",
                relay.transport_rate, relay.endpoint_input_rate, relay.endpoint_output_rate
            );
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("No config value at '{key}'"),
            },
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for warning in &warnings {
                    println!("warning: {warning}");
                }
                for error in &errors {
                    println!("error: {error}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} config error(s) in {}", errors.len(), config_path.display());
                }
                println!("Config OK ({} warning(s))", warnings.len());
            }
        },
    }

    Ok(())
}
