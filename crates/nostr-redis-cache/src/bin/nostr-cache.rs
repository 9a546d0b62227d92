use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use nostr_redis_cache::{
    CacheAdapter, CacheConfig, Filter, NostrEvent, RedisCache, KIND_RELAY_LIST,
};

#[derive(Debug, Parser)]
#[command(name = "nostr-cache")]
#[command(about = "Populate and inspect the Redis event cache")]
struct Args {
    /// Overrides NOSTR_CACHE_REDIS_URL.
    #[arg(long)]
    redis_url: Option<String>,
    /// Overrides NOSTR_CACHE_EXPIRATION_SECS.
    #[arg(long)]
    expiration_secs: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Record events read from JSON files; relay lists also fill the relay set.
    Record {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Print cached events for every author/kind pair as JSON lines.
    Query {
        #[arg(long, required = true)]
        author: Vec<String>,
        #[arg(long, required = true)]
        kind: Vec<u16>,
    },
    /// Print the cached relay list of a pubkey.
    Relays { pubkey: String },
}

/// Parse one file's contents, logging and skipping anything that is not a
/// content-addressed event.
fn parse_event(path: &Path, data: &str) -> Option<NostrEvent> {
    let event: NostrEvent = match serde_json::from_str(data) {
        Ok(event) => event,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Skipping file that is not an event");
            return None;
        }
    };
    if !event.has_valid_id() {
        warn!(path = %path.display(), "Skipping event whose id does not match its content");
        return None;
    }
    Some(event)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut config = CacheConfig::from_env()?;
    if let Some(url) = args.redis_url {
        config.redis_url = url;
    }
    if let Some(secs) = args.expiration_secs {
        config = config.with_expiration(Duration::from_secs(secs));
    }

    let cache = RedisCache::connect(config).await?;

    match args.command {
        Command::Record { files } => {
            for path in files {
                let data = std::fs::read_to_string(&path)?;
                let Some(event) = parse_event(&path, &data) else {
                    continue;
                };

                cache.record(&event, &Filter::new()).await?;
                if event.kind == KIND_RELAY_LIST {
                    let relays = cache.save_relay_list(&event.pubkey, &event).await?;
                    info!(pubkey = %event.pubkey, relays, "Saved relay list");
                }
                info!(event_id = %event.id, "Recorded event");
            }
        }
        Command::Query { author, kind } => {
            let filter = Filter::new().authors(author).kinds(kind);
            let (tx, mut rx) = mpsc::unbounded_channel();
            let hits = cache.resolve(&filter, &tx).await?;
            drop(tx);

            while let Some(received) = rx.recv().await {
                println!("{}", received.event.to_json()?);
            }
            info!(hits, "Query complete");
        }
        Command::Relays { pubkey } => {
            for tag in cache.get_relay_list(&pubkey).await? {
                println!("{}", serde_json::to_string(&tag)?);
            }
        }
    }

    Ok(())
}
