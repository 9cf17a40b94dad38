use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use duckops_llm::{
    Config, GeminiProvider, GenerateJson, GenerateOptions, LlmProvider, Message, ProviderRegistry,
    SecretStore,
};

#[derive(Parser)]
#[command(name = "duckops")]
#[command(version)]
#[command(about = "DuckOps LLM provider console")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered providers
    Providers,

    /// Probe one provider, or all of them
    Health {
        /// Provider name
        name: Option<String>,
    },

    /// Send a prompt and print the full reply
    Ask {
        /// The prompt to send
        prompt: String,
        #[command(flatten)]
        generation: GenerationArgs,
    },

    /// Send a prompt and print the reply as it streams
    Stream {
        /// The prompt to send
        prompt: String,
        #[command(flatten)]
        generation: GenerationArgs,
    },

    /// Send a prompt and print the reply decoded as JSON
    Json {
        /// The prompt to send
        prompt: String,
        #[command(flatten)]
        generation: GenerationArgs,
    },
}

#[derive(Args)]
struct GenerationArgs {
    /// Provider to use (falls back to the configured default)
    #[arg(short, long)]
    provider: Option<String>,

    /// Override the provider's default model
    #[arg(short, long)]
    model: Option<String>,

    #[arg(long)]
    max_tokens: Option<u32>,

    #[arg(long)]
    temperature: Option<f32>,

    #[arg(long)]
    top_p: Option<f32>,

    /// System prompt sent before the user prompt
    #[arg(short, long)]
    system: Option<String>,
}

impl GenerationArgs {
    fn options(&self) -> GenerateOptions {
        GenerateOptions {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
        }
    }

    fn messages(&self, prompt: &str) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system {
            messages.push(Message::system(system));
        }
        messages.push(Message::user(prompt));
        messages
    }
}

/// Registry plus the Gemini client, which is built and closed outside it
struct Providers {
    registry: ProviderRegistry,
    gemini: Option<Arc<GeminiProvider>>,
}

impl Providers {
    async fn init(ctx: &CancellationToken, config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Config::load(config_path.map(PathBuf::as_path))?;
        config.resolve_secrets(&SecretStore::default());

        let registry = ProviderRegistry::from_config(&config);

        let gemini = match config.provider("gemini") {
            Some(cfg) if !cfg.api_key.is_empty() => {
                match GeminiProvider::connect(ctx, &cfg.api_key, &cfg.model).await {
                    Ok(gemini) => {
                        let gemini = Arc::new(gemini);
                        registry.register(gemini.clone());
                        Some(gemini)
                    }
                    Err(e) => {
                        warn!("Failed to initialize provider 'gemini': {}", e);
                        None
                    }
                }
            }
            _ => None,
        };

        Ok(Self { registry, gemini })
    }

    fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn LlmProvider>> {
        let name = name.unwrap_or(self.registry.default_name());
        self.registry.get(name).ok_or_else(|| {
            anyhow!(
                "No provider named '{}' and no default provider registered",
                name
            )
        })
    }

    fn close(&self) {
        if let Some(gemini) = &self.gemini {
            gemini.close();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling in-flight requests");
            on_interrupt.cancel();
        }
    });

    let providers = Providers::init(&cancel, cli.config.as_ref()).await?;
    let result = match cli.command {
        Commands::Providers => cmd_providers(&providers),
        Commands::Health { name } => cmd_health(&cancel, &providers, name.as_deref()).await,
        Commands::Ask { prompt, generation } => {
            cmd_ask(&cancel, &providers, &prompt, &generation).await
        }
        Commands::Stream { prompt, generation } => {
            cmd_stream(&cancel, &providers, &prompt, &generation).await
        }
        Commands::Json { prompt, generation } => {
            cmd_json(&cancel, &providers, &prompt, &generation).await
        }
    };
    providers.close();
    result
}

fn cmd_providers(providers: &Providers) -> Result<()> {
    let mut names = providers.registry.list();
    names.sort();
    let default = providers.registry.default_name();
    for name in names {
        let marker = if name == default { " (default)" } else { "" };
        println!("{}{}", name, marker);
    }
    Ok(())
}

async fn cmd_health(
    ctx: &CancellationToken,
    providers: &Providers,
    name: Option<&str>,
) -> Result<()> {
    let targets = match name {
        Some(name) => vec![providers.resolve(Some(name))?],
        None => {
            let mut names = providers.registry.list();
            names.sort();
            names
                .iter()
                .filter_map(|n| providers.registry.get(n))
                .collect()
        }
    };

    let mut failed = 0;
    for provider in targets {
        match provider.health_check(ctx).await {
            Ok(()) => println!("{}: ok", provider.name()),
            Err(e) => {
                failed += 1;
                println!("{}: {:#}", provider.name(), anyhow::Error::from(e));
            }
        }
    }
    if failed > 0 {
        return Err(anyhow!("{} provider(s) unhealthy", failed));
    }
    Ok(())
}

async fn cmd_ask(
    ctx: &CancellationToken,
    providers: &Providers,
    prompt: &str,
    args: &GenerationArgs,
) -> Result<()> {
    let provider = providers.resolve(args.provider.as_deref())?;
    let text = provider
        .generate(ctx, &args.messages(prompt), Some(&args.options()))
        .await?;
    println!("{}", text);
    Ok(())
}

async fn cmd_stream(
    ctx: &CancellationToken,
    providers: &Providers,
    prompt: &str,
    args: &GenerationArgs,
) -> Result<()> {
    let provider = providers.resolve(args.provider.as_deref())?;
    let mut stream = provider
        .stream(ctx, &args.messages(prompt), Some(&args.options()))
        .await?;

    let mut stdout = std::io::stdout();
    while let Some(chunk) = stream.recv().await {
        if let Some(err) = chunk.error {
            writeln!(stdout)?;
            return Err(err.into());
        }
        write!(stdout, "{}", chunk.content)?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}

async fn cmd_json(
    ctx: &CancellationToken,
    providers: &Providers,
    prompt: &str,
    args: &GenerationArgs,
) -> Result<()> {
    let provider = providers.resolve(args.provider.as_deref())?;
    let value: serde_json::Value = provider
        .generate_json(ctx, &args.messages(prompt), Some(&args.options()))
        .await?;
    let pretty = serde_json::to_string_pretty(&value).context("Failed to format JSON reply")?;
    println!("{}", pretty);
    Ok(())
}
