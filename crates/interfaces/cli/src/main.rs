mod commands;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use digest_config::AppConfig;
use digest_llm::{LlmSettings, Provider};

#[derive(Debug, Parser)]
#[command(
    name = "digest",
    version,
    about = "Incremental category digests from a growing email CSV"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "config/default.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Poll the source file on the configured interval until Ctrl-C.
    Run,
    /// Run a single cycle and exit.
    Once,
    /// Show the persisted category aggregates.
    Status,
    /// Compose a cross-category digest from the persisted analyses.
    Compose {
        /// Write the digest here instead of the configured output path.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn init_tracing(fallback_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn llm_settings(config: &AppConfig) -> Result<LlmSettings> {
    let provider = Provider::from_label(&config.llm.provider)
        .with_context(|| format!("unknown llm.provider '{}'", config.llm.provider))?;
    let base_url = match provider {
        Provider::Ollama => config.llm.ollama_base_url.clone(),
        Provider::OpenRouter => config.llm.openrouter_base_url.clone(),
    };
    Ok(LlmSettings {
        provider,
        model: config.active_model().to_string(),
        base_url,
        max_tokens: config.llm.max_tokens,
        temperature: config.llm.temperature,
        request_timeout: Duration::from_secs(config.llm.request_timeout_secs),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // `.env.local` wins over `.env`; neither overrides the real environment.
    dotenvy::from_filename(".env.local").ok();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    init_tracing(&config.telemetry.log_level);
    config.validate()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => commands::run_loop(&config, llm_settings(&config)?).await,
        Commands::Once => commands::run_once(&config, llm_settings(&config)?).await,
        Commands::Status => commands::run_status(&config).await,
        Commands::Compose { output } => {
            let output = output.unwrap_or_else(|| PathBuf::from(&config.compose.output_path));
            commands::run_compose(&config, llm_settings(&config)?, &output).await
        }
    }
}
