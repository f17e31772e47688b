use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use waypoint_search::{
    user_profile_schema, CancellationToken, IndexClient, ProfileDocument, SchemaRegistry,
    SearchRequest, SyncConfig,
};

#[derive(Parser)]
#[command(name = "waypoint-search", about = "Keep the Waypoint profile index in sync")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory searched for waypoint-search.json.
    #[arg(long, env = "WAYPOINT_CONFIG_DIR", default_value = ".")]
    config_dir: PathBuf,

    /// Overrides the configured Meilisearch URL.
    #[arg(long)]
    url: Option<String>,

    /// Overrides the configured API key.
    #[arg(long, hide_env_values = true, env = "WAYPOINT_MEILISEARCH_API_KEY")]
    api_key: Option<String>,

    /// Index schema as JSON. Defaults to the built-in profile schema.
    #[arg(long)]
    schema: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the validated index schema as JSON
    Schema,
    /// Reconcile backend settings with the schema (Ctrl-C cancels)
    Apply,
    /// Upsert profiles from a JSON array file
    Upsert {
        #[arg(long)]
        file: PathBuf,
    },
    /// Run a search and print the result as JSON
    Search {
        #[arg(default_value = "")]
        query: String,
        #[arg(long = "filter")]
        filters: Vec<String>,
        #[arg(long = "sort")]
        sort_keys: Vec<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let registry = match &cli.schema {
        Some(path) => SchemaRegistry::load(path)?,
        None => SchemaRegistry::validate(user_profile_schema())?,
    };

    match cli.command {
        Command::Schema => {
            println!("{}", serde_json::to_string_pretty(registry.schema())?);
            Ok(())
        }
        Command::Apply => {
            let client = connect(&cli.config_dir, cli.url, cli.api_key, &registry)?;
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, cancelling settings apply");
                    trigger.cancel();
                }
            });
            let outcome = client.apply_settings(&cancel).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Command::Upsert { file } => {
            let content = std::fs::read_to_string(&file)
                .map_err(|e| format!("failed to read {}: {e}", file.display()))?;
            let docs: Vec<ProfileDocument> = serde_json::from_str(&content)
                .map_err(|e| format!("failed to parse {}: {e}", file.display()))?;
            let client = connect(&cli.config_dir, cli.url, cli.api_key, &registry)?;
            let summary = client.upsert_documents(&docs).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if summary.is_complete() {
                Ok(())
            } else {
                Err(format!("{} document(s) rejected", summary.rejected.len()).into())
            }
        }
        Command::Search {
            query,
            filters,
            sort_keys,
            limit,
            offset,
        } => {
            let client = connect(&cli.config_dir, cli.url, cli.api_key, &registry)?;
            let request = SearchRequest {
                query,
                limit,
                offset,
                filters,
                sort_keys,
            };
            let result = client.search(&request).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}

fn connect(
    config_dir: &Path,
    url: Option<String>,
    api_key: Option<String>,
    registry: &SchemaRegistry,
) -> CliResult<IndexClient> {
    let mut config = SyncConfig::load_or_default(config_dir)?;
    if let Some(url) = url {
        config.url = url;
    }
    if api_key.is_some() {
        config.api_key = api_key;
    }
    Ok(IndexClient::connect(registry, &config)?)
}
