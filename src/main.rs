use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chat_gateway::{
    ChatDispatchService, ChatService, Config, load_config_from,
    providers::types::FinishReason,
    store::{InMemoryCatalog, InMemoryConversationStore, InMemoryCredentialStore},
};
use clap::{Parser, Subcommand};
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Chat gateway over interchangeable LLM providers
#[derive(Parser, Debug)]
#[command(name = "chat-gateway", version, about)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, short, default_value = "chat-gateway.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List catalog models that can be served right now
    Models,
    /// Show registered providers and their built-in models
    Providers,
    /// Send one message in a fresh conversation
    Chat {
        /// Model id or wire name
        #[arg(long, short)]
        model: String,
        /// Print the reply as it streams in
        #[arg(long)]
        stream: bool,
        message: String,
    },
}

const CLI_USER: &str = "cli";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config_from(&cli.config)?;
    init_tracing(&config)?;

    tracing::info!(
        config = %cli.config.display(),
        credentials = config.credentials.len(),
        models = config.models.len(),
        "Configuration loaded successfully"
    );

    let catalog = Arc::new(InMemoryCatalog::new(config.models.clone()));
    let credentials = Arc::new(InMemoryCredentialStore::new(config.credentials.clone()));
    let dispatch = Arc::new(ChatDispatchService::from_config(&config, catalog, credentials).await?);

    match cli.command {
        Command::Models => {
            for model in dispatch.get_models().await? {
                println!("{:<40} {:<12} {}", model.id, model.provider, model.name);
            }
        }
        Command::Providers => {
            let real = dispatch.has_real_providers().await;
            println!("real providers configured: {}", real);
            for (provider, models) in dispatch.provider_models().await {
                let ids: Vec<_> = models.iter().map(|m| m.id.as_str()).collect();
                println!("{:<12} {}", provider, ids.join(", "));
            }
        }
        Command::Chat { model, stream, message } => {
            run_chat(&config, dispatch, &model, stream, &message).await?;
        }
    }

    Ok(())
}

async fn run_chat(
    config: &Config,
    dispatch: Arc<ChatDispatchService>,
    model: &str,
    stream: bool,
    message: &str,
) -> Result<()> {
    let store = Arc::new(InMemoryConversationStore::new());
    let conversation = store.create_conversation(CLI_USER, "cli session", model).await;
    let chat = ChatService::new(dispatch, store, config.dispatch.stream_buffer);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling request");
            ctrl_c.cancel();
        }
    });

    if !stream {
        let outcome = chat.send_message(&cancel, CLI_USER, &conversation.id, message).await?;
        println!("{}", outcome.response.content());
        if let Some(usage) = outcome.response.usage {
            tracing::info!(prompt = usage.prompt_tokens, completion = usage.completion_tokens, total = usage.total_tokens, "Token usage");
        }
        return Ok(());
    }

    let bridged = chat
        .send_message_stream(cancel.clone(), CLI_USER, &conversation.id, message)
        .await?;

    let mut events = ReceiverStream::new(bridged.receiver);
    let mut stdout = std::io::stdout();
    while let Some(event) = events.next().await {
        if event.finish_reason == FinishReason::Error {
            eprintln!();
            eprintln!("stream failed: {}", event.error_message().unwrap_or("unknown error"));
            break;
        }
        write!(stdout, "{}", event.content()).context("Failed to write to stdout")?;
        stdout.flush().context("Failed to flush stdout")?;
    }
    println!();

    let outcome = bridged.completion.await.context("Stream bridge task panicked")?;
    tracing::info!(
        chunks = outcome.delivered_chunks,
        termination = ?outcome.termination,
        saved = outcome.assistant_message.is_some(),
        "Stream finished"
    );
    Ok(())
}

/// 初始化结构化日志系统
///
/// `RUST_LOG` 优先，否则使用配置中的日志级别；格式支持 json / pretty / compact
fn init_tracing(config: &Config) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("chat_gateway={}", config.logging.level)));

    // logs go to stderr so streamed replies stay clean on stdout
    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.logging.format.as_str() {
        "json" => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true).json())
            .try_init(),
        "compact" => registry
            .with(fmt::layer().with_writer(std::io::stderr).compact())
            .try_init(),
        _ => registry
            .with(fmt::layer().with_writer(std::io::stderr).pretty())
            .try_init(),
    };

    result.map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))
}
