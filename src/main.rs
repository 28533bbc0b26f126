use clap::Parser;
use redzone::{
    config::{DnsConfig, StoreKind, normalize_prefix},
    handler::{RequestHandler, normalize_zone},
    resolver::Resolver,
    server::{DnsService, run_tcp_server, run_udp_server},
    store::{LocalStore, RecordStore, RedisStore},
    upstream::UdpUpstream,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{Semaphore, broadcast};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Authoritative DNS server answering from Redis hashes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address to listen on (UDP and TCP)
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Zones to serve, comma separated
    #[arg(short, long, value_delimiter = ',')]
    zones: Vec<String>,

    /// Redis addresses, comma separated
    #[arg(long, value_delimiter = ',')]
    redis: Vec<String>,

    /// Prefix prepended to every store key
    #[arg(long)]
    key_prefix: Option<String>,

    /// Serve from memory, seeded from this JSON file, instead of Redis
    #[arg(long)]
    seed_file: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut DnsConfig) {
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if !self.zones.is_empty() {
            config.zones = self.zones.iter().map(|z| normalize_zone(z)).collect();
        }
        if !self.redis.is_empty() {
            config.redis.addresses = self.redis;
        }
        if let Some(prefix) = self.key_prefix {
            config.key_prefix = normalize_prefix(&prefix);
        }
        if let Some(seed_file) = self.seed_file {
            config.store = StoreKind::Memory;
            config.seed_file = Some(seed_file);
        }
    }
}

async fn open_store(config: &DnsConfig) -> Result<Arc<dyn RecordStore>, Box<dyn std::error::Error>> {
    match config.store {
        StoreKind::Redis => {
            let store = RedisStore::connect(&config.redis).await?;
            store.ping().await?;
            Ok(Arc::new(store))
        }
        StoreKind::Memory => {
            let store = match &config.seed_file {
                Some(path) => LocalStore::from_file(path)?,
                None => {
                    warn!("Memory store has no seed file, every lookup will miss");
                    LocalStore::new()
                }
            };
            Ok(Arc::new(store))
        }
    }
}

type ServerExit = Result<
    Result<(), Box<dyn std::error::Error + Send + Sync>>,
    tokio::task::JoinError,
>;

fn report_exit(name: &str, result: ServerExit) {
    match result {
        Ok(Ok(())) => info!("{} server stopped", name),
        Ok(Err(e)) => error!("{} server failed: {}", name, e),
        Err(e) => error!("{} server task panicked: {}", name, e),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("redzone=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = DnsConfig::from_env()?;
    cli.apply(&mut config);
    config.validate()?;

    info!(
        "Starting redzone on {} for zones {:?} ({:?} store, prefix {:?})",
        config.bind_addr, config.zones, config.store, config.key_prefix
    );

    let store = open_store(&config).await?;
    let upstream = Arc::new(UdpUpstream::new(
        config.upstream_servers.clone(),
        config.upstream_timeout,
    ));
    if config.upstream_servers.is_empty() {
        warn!("No upstream servers configured, out-of-zone targets will be skipped");
    }

    let resolver = Arc::new(Resolver::new(
        store,
        upstream.clone(),
        config.key_prefix.clone(),
    ));
    let handler = RequestHandler::new(resolver, config.zone_set(), config.fallthrough.clone());
    let service = Arc::new(DnsService::new(handler, upstream));
    let query_semaphore = Arc::new(Semaphore::new(config.max_concurrent_queries));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let mut udp_task = tokio::spawn(run_udp_server(
        config.bind_addr,
        service.clone(),
        query_semaphore.clone(),
        shutdown_tx.subscribe(),
    ));
    let mut tcp_task = tokio::spawn(run_tcp_server(
        config.bind_addr,
        service,
        query_semaphore,
        shutdown_tx.subscribe(),
    ));

    // A listener that exits on its own (bind failure, socket error) stops the server.
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutdown signal received");
        }
        result = &mut udp_task => report_exit("UDP", result),
        result = &mut tcp_task => report_exit("TCP", result),
    }
    let _ = shutdown_tx.send(());

    for (name, task) in [("UDP", udp_task), ("TCP", tcp_task)] {
        if !task.is_finished() {
            report_exit(name, task.await);
        }
    }

    info!("redzone stopped");
    Ok(())
}
