use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};

use radic::core::bits::class_bits;
use radic::core::config::{HubConfig, ShardConfig};
use radic::core::types::Product;
use radic::hub::server::HubServer;
use radic::hub::{HubProxy, MemStore, RemoteStore, ServiceHub};
use radic::index::builder::build_index;
use radic::index::{IndexService, Indexer};
use radic::kv::KvKind;
use radic::query::TermQuery;
use radic::rpc::{IndexServer, Sentinel};
use radic::trie::{Trie, TrieStore};

#[derive(Parser, Debug)]
#[command(name = "radic", about = "Distributed product search engine")]
struct Args {
    /// 1 = standalone web+index, 2 = shard server, 3 = coordinator web,
    /// 4 = hub daemon
    #[arg(long, default_value_t = 1)]
    mode: u8,

    #[arg(long, default_value_t = 5678)]
    port: u16,

    #[arg(long = "dbPath", default_value = "data/local_db/products")]
    db_path: PathBuf,

    /// Rebuild the index from the CSV file on startup.
    #[arg(long, default_value_t = false)]
    index: bool,

    #[arg(long = "totalWorkers", default_value_t = 0)]
    total_workers: u32,

    #[arg(long = "workerIndex", default_value_t = 0)]
    worker_index: u32,

    #[arg(long = "csvFile", default_value = "data/products.csv")]
    csv_file: PathBuf,

    #[arg(long = "triePath", default_value = "data/local_db/trie")]
    trie_path: PathBuf,

    /// Hub daemon endpoints, comma separated.
    #[arg(long = "hub", value_delimiter = ',', default_value = "127.0.0.1:7600")]
    hub: Vec<String>,

    /// Forward index backend: tree or log.
    #[arg(long = "kv", default_value = "tree")]
    kv: String,

    #[arg(long, default_value_t = 100)]
    qps: u32,
}

fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(|w| w.to_lowercase()).collect()
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    query: String,
    #[serde(default)]
    classes: Vec<String>,
    #[serde(default)]
    price_from: f64,
    #[serde(default)]
    price_to: f64,
}

#[derive(Debug, Deserialize)]
struct AssociateBody {
    query: String,
}

#[derive(Debug, Serialize)]
struct SearchReply(Vec<Product>);

struct Facade<I> {
    index: Arc<I>,
    trie: Option<TrieStore>,
}

type FacadeState<I> = State<Arc<Facade<I>>>;

async fn search_all<I: IndexService + 'static>(
    State(facade): FacadeState<I>,
    Json(body): Json<SearchBody>,
) -> Json<SearchReply> {
    let words = tokenize(&body.query);
    if words.is_empty() {
        return Json(SearchReply(Vec::new()));
    }
    let query = TermQuery::Must(
        words
            .iter()
            .map(|w| TermQuery::keyword("content", w))
            .collect(),
    );
    let or_flags = vec![class_bits(&body.classes)];

    let docs = match facade.index.search(query, 0, 0, or_flags).await {
        Ok(docs) => docs,
        Err(e) => {
            warn!(error = %e, "search failed");
            return Json(SearchReply(Vec::new()));
        }
    };

    let mut products = Vec::with_capacity(docs.len());
    for doc in docs {
        match bincode::deserialize::<Product>(&doc.payload) {
            Ok(product) => products.push(product),
            Err(e) => warn!(id = %doc.id, error = %e, "undecodable product payload"),
        }
    }
    if body.price_to > 0.0 && body.price_from <= body.price_to {
        products.retain(|p| {
            p.discount_price >= body.price_from && p.discount_price <= body.price_to
        });
    }
    // Ranking is an external concern; results keep merge order here.
    Json(SearchReply(products))
}

async fn associate<I: IndexService + 'static>(
    State(facade): FacadeState<I>,
    Json(body): Json<AssociateBody>,
) -> Json<Vec<String>> {
    let Some(trie) = &facade.trie else {
        return Json(Vec::new());
    };
    match trie.suggest(&body.query) {
        Ok(completions) => Json(completions),
        Err(e) => {
            warn!(error = %e, "associate failed");
            Json(Vec::new())
        }
    }
}

fn facade_router<I: IndexService + 'static>(facade: Arc<Facade<I>>) -> Router {
    Router::new()
        .route("/search", post(search_all::<I>))
        .route("/associate", post(associate::<I>))
        .with_state(facade)
}

fn read_products(csv_file: &PathBuf) -> Result<Vec<Product>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(csv_file)
        .with_context(|| format!("open {}", csv_file.display()))?;
    let mut products = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.len() < 9 {
            continue;
        }
        let field = |i: usize| record.get(i).unwrap_or_default().to_string();
        products.push(Product {
            id: uuid::Uuid::new_v4().to_string(),
            name: field(0),
            category: field(1),
            image: field(3),
            ratings: field(5).parse().unwrap_or_default(),
            no_ratings: field(6).parse().unwrap_or_default(),
            discount_price: field(7).parse().unwrap_or_default(),
            actual_price: field(8).parse().unwrap_or_default(),
        });
    }
    Ok(products)
}

fn shard_config(args: &Args) -> Result<ShardConfig> {
    let mut config = ShardConfig::new(&args.db_path);
    config.total_workers = args.total_workers;
    config.worker_index = args.worker_index;
    config.kv_kind = match args.kv.as_str() {
        "tree" => KvKind::Tree,
        "log" => KvKind::Log,
        other => bail!("unknown kv backend {other:?}, expected tree or log"),
    };
    Ok(config)
}

/// Open the shard indexer and either rebuild it from the CSV or reload
/// the durable state. A rebuild rewrites the persisted trie as well.
fn prepare_indexer(args: &Args) -> Result<Arc<Indexer>> {
    let indexer = Arc::new(Indexer::open(&shard_config(args)?)?);
    if args.index {
        let products = read_products(&args.csv_file)?;
        let mut trie = Trie::new();
        let stats = build_index(
            products,
            &tokenize,
            &indexer,
            args.total_workers,
            args.worker_index,
            &mut trie,
        )?;
        info!(indexed = stats.indexed, skipped = stats.skipped, "index rebuilt");
        let trie_store = TrieStore::open(&args.trie_path)?;
        trie_store.store(&trie)?;
        trie_store.close()?;
    } else {
        indexer.load_from_disk()?;
    }
    Ok(indexer)
}

async fn serve_facade<I: IndexService + 'static>(
    port: u16,
    facade: Arc<Facade<I>>,
) -> Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    info!(port, "web server listening");
    let app = facade_router(Arc::clone(&facade));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    facade.index.close().await?;
    if let Some(trie) = &facade.trie {
        trie.close()?;
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    match args.mode {
        // Standalone: local shard + facade in one process.
        1 => {
            let indexer = prepare_indexer(&args)?;
            let facade = Arc::new(Facade {
                index: indexer,
                trie: Some(TrieStore::open(&args.trie_path)?),
            });
            serve_facade(args.port, facade).await
        }
        // One shard worker serving RPC, registered with the hub.
        2 => {
            let indexer = prepare_indexer(&args)?;
            let store = Arc::new(RemoteStore::new(args.hub.clone())?);
            let hub_config = HubConfig::default();
            let hub = Arc::new(ServiceHub::new(store, &hub_config));
            let server = IndexServer::start(indexer, args.port, Some(hub)).await?;
            info!(addr = server.self_addr(), "shard worker running");
            tokio::signal::ctrl_c().await?;
            server.close().await?;
            Ok(())
        }
        // Coordinator: facade over the whole fleet.
        3 => {
            let store = Arc::new(RemoteStore::new(args.hub.clone())?);
            let mut hub_config = HubConfig::default();
            hub_config.qps = args.qps;
            let hub = Arc::new(ServiceHub::new(store, &hub_config));
            let proxy = Arc::new(HubProxy::new(hub, &hub_config));
            let facade = Arc::new(Facade {
                index: Arc::new(Sentinel::new(proxy)),
                trie: Some(TrieStore::open(&args.trie_path)?),
            });
            serve_facade(args.port, facade).await
        }
        // Coordination hub daemon.
        4 => {
            let server = HubServer::start(Arc::new(MemStore::new()), args.port).await?;
            info!(addr = %server.addr(), "hub daemon running");
            tokio::signal::ctrl_c().await?;
            server.close().await;
            Ok(())
        }
        other => bail!("unknown mode {other}, expected 1-4"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    run(args).await
}
