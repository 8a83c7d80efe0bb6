//! Manual RAG server binary
//!
//! Run with: cargo run -p manual-rag --bin manual-rag-server -- --config rag.toml

use clap::Parser;
use std::path::PathBuf;

use manual_rag::{config::RagConfig, generation::OllamaClient, server::RagServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Question answering over technical manuals with page citations
#[derive(Debug, Parser)]
#[command(name = "manual-rag-server", version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "RAG_CONFIG")]
    config: Option<PathBuf>,

    /// Override the bind host
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "manual_rag=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    println!(
        r#"
╔═══════════════════════════════════════════════════════════╗
║                      Manual RAG                           ║
║        Technical Manual Q&A with Page Citations           ║
╚═══════════════════════════════════════════════════════════╝
"#
    );

    let mut config = RagConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    tracing::info!("Configuration loaded");
    tracing::info!("  - Embedding model: {}", config.llm.embed_model);
    tracing::info!("  - Generation model: {}", config.llm.generate_model);
    tracing::info!("  - Reranker: {:?}", config.reranker.kind);
    tracing::info!(
        "  - Retrieval widths: k_broad={}, n_final={}",
        config.retrieval.k_broad,
        config.retrieval.n_final
    );

    tracing::info!("Checking Ollama at {}...", config.llm.base_url);
    let ollama = OllamaClient::new(&config.llm)?;
    match ollama.health_check().await {
        Ok(true) => tracing::info!("Ollama is running"),
        _ => {
            tracing::warn!("Ollama not available at {}", config.llm.base_url);
            tracing::warn!("  1. Start: ollama serve");
            tracing::warn!(
                "  2. Pull models: ollama pull {} && ollama pull {}",
                config.llm.embed_model,
                config.llm.generate_model
            );
        }
    }

    let server = RagServer::new(config).await?;

    println!("\nServer starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("  API Info: http://{}/api/info", server.address());
    println!("\nEndpoints:");
    println!("  POST /api/upload - Upload a PDF or DOCX manual");
    println!("  POST /api/chat   - Ask a question (streamed)");
    println!("  POST /api/query  - Ask a question (JSON with citations)");
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
