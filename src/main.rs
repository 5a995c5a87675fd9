//! msgbridge - Messages-protocol gateway for OpenAI-style backends
//!
//! A local server that accepts Messages-protocol requests and serves them
//! from a different backend model family.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use msgbridge::router::{Alias, RouteSpec};
use msgbridge::Config;

#[derive(Parser)]
#[command(name = "msgbridge")]
#[command(about = "Messages-protocol gateway for OpenAI-style backends")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// Show the advertised model catalog
    Models {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

fn init_tracing(level: &str) {
    let default_filter = format!("msgbridge={},tower_http=info", level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            let (mut cfg, key_source) = Config::from_file(&config)?;
            init_tracing(&cfg.logging.level);

            tracing::info!(config = %config, key_source = %key_source, "Loaded configuration");
            if cfg.upstream.api_key.is_none() {
                tracing::warn!("No upstream API key configured - requests are sent unauthenticated");
            }

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                cfg.server.listen = addr;
            }

            msgbridge::proxy::run_server(cfg).await
        }

        Commands::Check { config } => {
            let (cfg, key_source) = Config::from_file(&config)?;
            let router = cfg.model_router();

            println!("Configuration OK: {}", config);
            println!("  listen:        {}", cfg.server.listen);
            println!("  upstream:      {}", cfg.upstream.url);
            println!("  provider:      {}", router.provider());
            println!("  default model: {}", router.fallback_model());
            println!("  api key:       {}", key_source);
            println!("  routes:        {}", router.table().len());

            for entry in router.table().entries() {
                let scope = match &entry.alias {
                    Some(Alias::Provider { provider, .. }) => provider.as_str(),
                    Some(Alias::Bare(_)) => "*",
                    None => "default",
                };
                let target = entry
                    .spec
                    .resolve(router.provider())
                    .map(|t| t.model_id.as_str())
                    .unwrap_or("-");
                let note = match entry.spec {
                    RouteSpec::Invalid => " (invalid)",
                    _ => "",
                };
                println!("    [{}] {} -> {}{}", scope, entry.key, target, note);
            }

            Ok(())
        }

        Commands::Models { config } => {
            let (cfg, _) = Config::from_file(&config)?;
            for model in cfg.model_router().catalog() {
                println!("{}", model);
            }
            Ok(())
        }
    }
}
