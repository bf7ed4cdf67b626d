use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use holocron_core::{AliasTable, Config, load_dotenv};
use holocron_db::{CheckpointStatus, GraphStore};
use holocron_knowledge::pipeline::EXTRACTION_PHASE;
use holocron_knowledge::{
    ChunkReader, ContextRequest, ExtractionRun, Extractor, JsonCallPolicy, LlmClient,
    OpenAiCompatibleClient, RuntimeRetriever, SqliteChunkSource, Synthesizer, run_extraction,
};
use serde_json::json;
use tracing::{info, warn};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser, Debug)]
#[command(name = "holocron", about = "Narrative knowledge graph builder", version)]
struct Cli {
    /// Era to work on (defaults to `extraction.era`)
    #[arg(long, global = true)]
    era: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Estimate LLM calls and runtime for an extraction run
    Estimate,
    /// Extract entities and relationships from the chunk store
    Extract {
        /// Skip chapters already completed
        #[arg(long)]
        resume: bool,
        /// Only process this book
        #[arg(long)]
        book: Option<String>,
    },
    /// Write character arcs and location dossiers
    Synthesize,
    /// List conflicting faction memberships and control claims
    Contradictions,
    /// Print graph counts
    Stats,
    /// Render a director context block
    Context {
        #[arg(long = "character", required = true)]
        characters: Vec<String>,
        #[arg(long)]
        location: Option<String>,
        /// Token budget (defaults to `retrieval.token_budget`)
        #[arg(long)]
        budget: Option<usize>,
        /// Render the narrator subset instead
        #[arg(long)]
        narrator: bool,
    },
}

#[tokio::main]
async fn main() -> CliResult<()> {
    load_dotenv();
    let cli = Cli::parse();
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.settings.logging.level.as_str().into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let era = cli.era.clone().unwrap_or_else(|| config.era().to_string());
    info!(era = %era, "holocron starting");

    match cli.command {
        Command::Estimate => estimate(&config, &era).await,
        Command::Extract { resume, book } => extract(&config, &era, resume, book).await,
        Command::Synthesize => synthesize(&config, &era).await,
        Command::Contradictions => contradictions(&config, &era).await,
        Command::Stats => stats(&config, &era).await,
        Command::Context {
            characters,
            location,
            budget,
            narrator,
        } => {
            let request = ContextRequest {
                character_ids: characters,
                location,
                era,
                token_budget: budget,
                ..ContextRequest::default()
            };
            context(&config, request, narrator).await
        }
    }
}

fn chunk_reader(config: &Config) -> CliResult<ChunkReader<SqliteChunkSource>> {
    let storage = &config.settings.storage;
    let path: PathBuf = storage
        .chunk_db_path
        .clone()
        .ok_or("storage.chunk_db_path is not set")?;
    let source = SqliteChunkSource::new(path, storage.chunk_table.clone());
    Ok(ChunkReader::new(Arc::new(source)))
}

async fn open_store(config: &Config) -> CliResult<GraphStore> {
    let store = GraphStore::open(&config.graph_db_path()?)
        .await?
        .with_stub_confidence(config.settings.extraction.stub_confidence);
    Ok(store)
}

fn llm_client(config: &Config) -> CliResult<Arc<dyn LlmClient>> {
    let key = config.llm_api_key()?.to_string();
    let client = OpenAiCompatibleClient::from_settings(&config.settings.llm, Some(key))?;
    Ok(Arc::new(client))
}

fn print_json(value: &impl serde::Serialize) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn estimate(config: &Config, era: &str) -> CliResult<()> {
    let extraction = &config.settings.extraction;
    let estimate = chunk_reader(config)?
        .estimate(era, extraction.chunks_per_call, extraction.seconds_per_call)
        .await;
    print_json(&estimate)
}

async fn extract(config: &Config, era: &str, resume: bool, book: Option<String>) -> CliResult<()> {
    let llm = llm_client(config)?;
    let books = chunk_reader(config)?.books(era).await;
    if books.is_empty() {
        warn!(era, "no chunks found for era");
    }

    let aliases = match &config.settings.storage.alias_table_path {
        Some(path) => AliasTable::load(path)?,
        None => AliasTable::default(),
    };
    let store = open_store(config).await?;
    let extractor = Extractor::new(
        llm,
        store.clone(),
        Arc::clone(store.vocabulary()),
        Arc::new(aliases),
    )
    .with_policy(JsonCallPolicy::from(&config.settings.llm))
    .with_stub_confidence(config.settings.extraction.stub_confidence);

    let run = ExtractionRun {
        era: era.to_string(),
        resume,
        book_filter: book,
        chunks_per_call: config.settings.extraction.chunks_per_call,
    };
    let report = run_extraction(&extractor, &books, &run).await;
    store.close().await;
    print_json(&report)
}

async fn synthesize(config: &Config, era: &str) -> CliResult<()> {
    let llm = if config.has_llm() {
        Some(llm_client(config)?)
    } else {
        warn!("no LLM key configured, assembling summaries from graph facts");
        None
    };
    let store = open_store(config).await?;
    let report = Synthesizer::new(store.clone(), llm)
        .with_policy(JsonCallPolicy::from(&config.settings.llm))
        .synthesize(era)
        .await?;
    store.close().await;
    print_json(&report)
}

async fn contradictions(config: &Config, era: &str) -> CliResult<()> {
    let store = GraphStore::open_read_only(&config.graph_db_path()?).await?;
    let found = Synthesizer::new(store.clone(), None)
        .detect_contradictions(era)
        .await?;
    store.close().await;
    print_json(&found)
}

async fn stats(config: &Config, era: &str) -> CliResult<()> {
    let store = GraphStore::open_read_only(&config.graph_db_path()?).await?;
    let mut checkpoints = serde_json::Map::new();
    for status in [
        CheckpointStatus::Pending,
        CheckpointStatus::InProgress,
        CheckpointStatus::Completed,
        CheckpointStatus::Failed,
    ] {
        let count = store.checkpoints(EXTRACTION_PHASE, Some(status)).await?.len();
        checkpoints.insert(status.to_string(), json!(count));
    }
    let report = json!({
        "era": era,
        "entities": store.entity_count(Some(era)).await?,
        "stubs": store.stub_count(Some(era)).await?,
        "triples": store.triple_count(Some(era)).await?,
        "checkpoints": checkpoints,
    });
    store.close().await;
    print_json(&report)
}

async fn context(config: &Config, request: ContextRequest, narrator: bool) -> CliResult<()> {
    let retriever = RuntimeRetriever::new(config.graph_db_path()?)
        .with_settings(config.settings.retrieval.clone());
    let block = if narrator {
        retriever.narrator_context(&request).await
    } else {
        retriever.director_context(&request).await
    };
    if block.is_empty() {
        eprintln!("no graph context for the given characters");
    } else {
        println!("{block}");
    }
    Ok(())
}
