//! llm-manager - Main entry point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use llm_manager::{
    ArtifactRegistry, ChatMessage, GenerationParams, HfHub, InferencePool, LifecycleManager,
    ManagerConfig, api, device, metrics, runtime,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "llm-manager")]
#[command(about = "Local GGUF model manager and inference server", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty", global = true)]
    log_format: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the API server
    Serve {
        /// Override API port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Pull a model from HuggingFace Hub
    Pull {
        /// Model name (e.g. Qwen/Qwen2-1.5B-Instruct-GGUF)
        model: String,
    },
    /// List downloaded models
    List,
    /// Delete a model and its files
    Delete {
        model: String,

        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// One-shot text generation
    Generate {
        model: String,
        prompt: String,

        #[arg(long, default_value_t = 32768)]
        max_tokens: u32,

        #[arg(long, default_value_t = 0.7)]
        temperature: f32,
    },
    /// Interactive chat with a model
    Run {
        /// Model name (defaults to the first downloaded model)
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    match cli.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(&cli.log_level)
                .init();
        }
    }

    let mut config = ManagerConfig::load(cli.config)?;
    if let Some(Command::Serve { port: Some(port) }) = &cli.command {
        config.api_port = *port;
    }
    config.validate()?;

    device::init();

    match cli.command.unwrap_or(Command::Serve { port: None }) {
        Command::Serve { .. } => serve(config).await,
        Command::Pull { model } => pull(config, &model).await,
        Command::List => list(config).await,
        Command::Delete { model, yes } => delete(config, &model, yes).await,
        Command::Generate {
            model,
            prompt,
            max_tokens,
            temperature,
        } => generate(config, &model, &prompt, max_tokens, temperature).await,
        Command::Run { model } => run(config, model).await,
    }
}

async fn open_registry(config: &ManagerConfig) -> Result<Arc<ArtifactRegistry>> {
    let hub = Arc::new(HfHub::new());
    let registry =
        ArtifactRegistry::open(config.models_dir.clone(), config.registry_file(), hub).await?;
    Ok(Arc::new(registry))
}

async fn build_manager(config: &ManagerConfig) -> Result<Arc<LifecycleManager>> {
    let registry = open_registry(config).await?;
    let inference_runtime = runtime::default_runtime()?;
    let pool = Arc::new(InferencePool::new(
        inference_runtime,
        config.load_config(),
        config.max_resident_models,
    ));
    Ok(Arc::new(LifecycleManager::new(registry, pool)))
}

async fn serve(config: ManagerConfig) -> Result<()> {
    tracing::info!("Starting llm-manager");
    tracing::info!(
        api_port = config.api_port,
        models_dir = ?config.models_dir,
        max_resident = ?config.max_resident_models,
        "Configuration loaded"
    );

    // Setup metrics
    let prometheus_handle = metrics::setup_metrics()?;

    let manager = build_manager(&config).await?;
    metrics::update_model_count(manager.registry().count().await);

    // Setup API
    let app_state = api::AppState {
        manager: manager.clone(),
        prometheus_handle,
    };

    let app = api::create_router(app_state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.api_port));
    tracing::info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind API server")?;

    // Graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    tracing::info!("Shutting down...");

    manager.shutdown().await;

    tracing::info!("Shutdown complete");

    Ok(())
}

async fn pull(config: ManagerConfig, model: &str) -> Result<()> {
    let registry = open_registry(&config).await?;

    println!("Pulling {model}...");
    let record = registry.fetch(model).await?;

    match registry.status(model).await {
        llm_manager::ArtifactStatus::Ready => {
            println!(
                "Pulled {} ({}, {})",
                record.name,
                record.selected_variant,
                record.local_path.display()
            );
            Ok(())
        }
        status => anyhow::bail!("artifact is not ready after fetch: {status}"),
    }
}

async fn list(config: ManagerConfig) -> Result<()> {
    let registry = open_registry(&config).await?;
    let records = registry.list().await;

    if records.is_empty() {
        println!("No models downloaded.");
        println!("Use 'llm-manager pull <model>' to download one.");
        return Ok(());
    }

    for (i, record) in records.iter().enumerate() {
        let status = registry.status(&record.name).await;
        println!("{}. {} [{}]", i + 1, record.name, status);
        println!("   variant: {}", record.selected_variant);
        println!("   path: {}", record.local_path.display());
    }

    Ok(())
}

async fn delete(config: ManagerConfig, model: &str, yes: bool) -> Result<()> {
    if !yes {
        print!("Delete model '{model}' and all of its files? (y/N): ");
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        let answer = answer.trim().to_lowercase();
        if answer != "y" && answer != "yes" {
            println!("Aborted");
            return Ok(());
        }
    }

    let registry = open_registry(&config).await?;
    if registry.delete(model).await? {
        println!("Deleted {model}");
        Ok(())
    } else {
        anyhow::bail!("model '{model}' not found")
    }
}

async fn generate(
    config: ManagerConfig,
    model: &str,
    prompt: &str,
    max_tokens: u32,
    temperature: f32,
) -> Result<()> {
    let manager = build_manager(&config).await?;

    let params = GenerationParams {
        max_tokens,
        temperature,
        ..Default::default()
    };

    let result = manager.generate(model, prompt, &params).await?;
    println!("{}", result.text);

    manager.shutdown().await;
    Ok(())
}

async fn run(config: ManagerConfig, model: Option<String>) -> Result<()> {
    let manager = build_manager(&config).await?;

    let model = match model {
        Some(m) => m,
        None => {
            let records = manager.registry().list().await;
            records
                .first()
                .map(|r| r.name.clone())
                .context("no models downloaded; use 'llm-manager pull <model>' first")?
        }
    };

    println!("Loading {model}...");
    manager.load_by_name(&model).await?;
    println!("Ready. Type a message ('exit' to quit).");

    let mut messages: Vec<ChatMessage> = Vec::new();
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input, "exit" | "quit" | "bye") {
            break;
        }

        messages.push(ChatMessage::new("user", input));
        // Keep the conversation history bounded
        if messages.len() > 10 {
            messages.drain(..messages.len() - 8);
        }

        let mut stream = manager
            .chat_stream(&model, messages.clone(), &GenerationParams::default())
            .await?;

        let mut reply = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => {
                    if chunk.done {
                        reply = chunk.content;
                        break;
                    }
                    print!("{}", chunk.delta);
                    std::io::stdout().flush()?;
                }
                Err(e) => {
                    eprintln!();
                    eprintln!("generation failed: {e}");
                    break;
                }
            }
        }
        println!();

        if !reply.is_empty() {
            messages.push(ChatMessage::new("assistant", reply));
        }
    }

    manager.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
