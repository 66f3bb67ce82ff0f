use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use meridian_meta::log::FjallLog;
use meridian_meta::proto::{parse_node_addr, Node, META_PORT_SHIFT_CMD, META_PORT_SHIFT_LOG};
use meridian_meta::updater::UpdaterConfig;
use meridian_meta::{MetaServer, MetaServerConfig};

/// Meta (control-plane) node for the meridian sharded key-value cluster.
#[derive(Parser, Debug)]
#[command(name = "meridian-meta")]
struct Args {
    /// Address this node advertises to its peers.
    #[arg(long, env = "MERIDIAN_META_LOCAL_IP", default_value = "127.0.0.1")]
    local_ip: String,

    /// Base port; commands are served on base + 100, the replicated log
    /// speaks on base + 3000.
    #[arg(long, env = "MERIDIAN_META_LOCAL_PORT")]
    local_port: i32,

    /// Comma-separated meta ensemble members as `ip:port` base addresses,
    /// this node included. Empty means a stand-alone node.
    #[arg(long, env = "MERIDIAN_META_PEERS", default_value = "")]
    meta_peers: String,

    /// Directory for the log engine's storage.
    #[arg(long, env = "MERIDIAN_META_DATA_PATH", default_value = "./meridian-meta-data")]
    data_path: PathBuf,

    /// Worker threads for the command runtime.
    #[arg(long, env = "MERIDIAN_META_WORKERS", default_value_t = 4)]
    worker_threads: usize,

    /// A storage node is DOWN after this long without a heartbeat.
    #[arg(long, default_value_t = 60)]
    node_alive_ttl_secs: u64,

    /// Base cron interval (ms); one timing pass runs every ten intervals.
    #[arg(long, default_value_t = 100)]
    cron_interval_ms: u64,

    /// Offset-condition evaluation interval (ms).
    #[arg(long, default_value_t = 100)]
    condition_interval_ms: u64,

    /// Pending offset conditions are cancelled after this long.
    #[arg(long, default_value_t = 600)]
    condition_timeout_secs: u64,

    /// Relocations staged per migration pass.
    #[arg(long, default_value_t = 8)]
    migrate_once_count: usize,

    /// Staging retries inside one MIGRATE command.
    #[arg(long, default_value_t = 3)]
    migrate_init_retry: u32,

    /// A catching-up replica may trail by this many bytes and still pass its
    /// offset condition.
    #[arg(long, default_value_t = 50)]
    offset_gap_tolerance: u64,

    /// Topology commit retries after a lost log write.
    #[arg(long, default_value_t = 5)]
    apply_max_retry: u32,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.worker_threads.max(1))
        .enable_all()
        .build()
        .context("build runtime")?;
    runtime.block_on(run(args))
}

async fn run(args: Args) -> anyhow::Result<()> {
    let local_log = Node::new(args.local_ip.clone(), args.local_port + META_PORT_SHIFT_LOG);

    let mut peers = Vec::new();
    for entry in args.meta_peers.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let base = parse_node_addr(entry)
            .map_err(|err| anyhow::anyhow!("bad --meta-peers entry {entry}: {err}"))?;
        peers.push(Node::new(base.ip, base.port + META_PORT_SHIFT_LOG));
    }
    if !peers.is_empty() && !peers.contains(&local_log) {
        anyhow::bail!(
            "--meta-peers must include this node ({}:{})",
            args.local_ip,
            args.local_port
        );
    }

    let log = FjallLog::open(&args.data_path, local_log, peers)
        .with_context(|| format!("open log engine at {}", args.data_path.display()))?;

    let config = MetaServerConfig {
        local_ip: args.local_ip.clone(),
        base_port: args.local_port,
        node_alive_ttl: Duration::from_secs(args.node_alive_ttl_secs.max(1)),
        cron_interval: Duration::from_millis(args.cron_interval_ms.max(10)),
        condition_interval: Duration::from_millis(args.condition_interval_ms.max(10)),
        condition_timeout: Duration::from_secs(args.condition_timeout_secs.max(1)),
        offset_gap_tolerance: args.offset_gap_tolerance,
        migrate_once_count: args.migrate_once_count.max(1),
        migrate_init_retry: args.migrate_init_retry,
        updater: UpdaterConfig {
            apply_max_retry: args.apply_max_retry,
            ..UpdaterConfig::default()
        },
    };

    let server = MetaServer::start(config, Arc::new(log))
        .await
        .map_err(|err| anyhow::anyhow!("meta server startup failed: {err}"))?;
    tracing::info!(
        cmd_port = args.local_port + META_PORT_SHIFT_CMD,
        log_port = args.local_port + META_PORT_SHIFT_LOG,
        "meridian meta node running"
    );

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    tracing::info!("shutting down");
    server.stop().await;
    Ok(())
}
