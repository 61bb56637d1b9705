// copier-engine: cross-venue copy-trading engine.
//
// Observes a Master trader's orders and fills on Hyperliquid (read-only)
// and mirrors equivalent positions on a Follower perpetuals venue. The
// Order Executor is the single state machine translating Master events
// into Follower actions; everything else (Mapper, Ledger, Journal, Risk
// Gate, Reconciler, Rebalancer, Validator) exists to keep that state
// machine idempotent and recoverable across restarts.
mod calculator;
mod config;
mod error;
mod events;
mod executor;
mod follower;
mod follower_signing;
mod instrument;
mod journal;
mod ledger;
mod mapper;
mod master;
mod rebalancer;
mod reconcile;
mod risk;
mod store;
mod validator;

use clap::Parser;
use config::EngineConfig;
use executor::{Executor, ExecutorConfig};
use follower::{BinanceLikeClient, FollowerClient};
use instrument::InstrumentRegistry;
use journal::Journal;
use ledger::Ledger;
use mapper::Mapper;
use master::{MasterEvent, MasterIngest};
use reconcile::Reconciler;
use risk::RiskGate;
use std::sync::Arc;
use store::Store;
use tokio::sync::{mpsc, watch, RwLock};
use validator::Validator;

#[derive(Parser, Debug)]
#[command(name = "copier-engine")]
struct Cli {
    /// Path to an instruments.toml naming supported instruments and their
    /// sizing/risk parameters.
    #[arg(long, env = "INSTRUMENTS_TOML")]
    instruments: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();
    log::info!("copier-engine starting");

    let cli = Cli::parse();
    let config = match EngineConfig::from_env(cli.instruments.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            log::error!("[CONFIG] {e}");
            std::process::exit(78); // EX_CONFIG
        }
    };

    log::info!(
        "  followed_users={:?} trading_mode={:?} instruments={}",
        config.followed_users,
        config.trading_mode,
        config.instruments.len()
    );

    let store = Store::new(&config.redis_url)?;
    let mapper = Mapper::new(store.clone());
    let ledger = Ledger::new(store.clone());
    let journal = Journal::new(store.clone());
    let instruments = InstrumentRegistry::new(config.instruments.clone());
    let risk = Arc::new(RwLock::new(RiskGate::new(config.emergency_stop)));

    for instrument in instruments.symbols().map(str::to_string).collect::<Vec<_>>() {
        ledger.init(&instrument).await?;
    }

    let follower: Arc<dyn FollowerClient> = Arc::new(BinanceLikeClient::new(
        config.follower_rest_url.clone(),
        config.follower_api_key.clone(),
        config.follower_api_secret.clone(),
    ));

    let master = Arc::new(MasterIngest::new(
        config.master_ws_url.clone(),
        config.master_rest_url.clone(),
        config.followed_users.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let executor = Arc::new(Executor::new(
        mapper.clone(),
        ledger.clone(),
        journal.clone(),
        risk.clone(),
        instruments.clone(),
        follower.clone(),
        ExecutorConfig {
            trading_mode: config.trading_mode,
            fixed_ratio: config.fixed_ratio,
            equal_ratio: config.equal_ratio,
        },
    ));

    let reconciler = Arc::new(Reconciler::new(
        mapper.clone(),
        ledger.clone(),
        journal.clone(),
        instruments.clone(),
        master.clone(),
        follower.clone(),
        executor.clone(),
        config.trading_mode,
        config.fixed_ratio,
        config.equal_ratio,
    ));
    if let Err(e) = reconciler.reconcile_startup(&config.followed_users).await {
        log::error!("[RECONCILE] startup reconciliation failed: {e}");
    }

    let (master_tx, mut master_rx) = mpsc::channel::<MasterEvent>(1024);
    {
        let master = master.clone();
        tokio::spawn(async move { master.run(master_tx).await });
    }

    {
        let executor = executor.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = master_rx.recv() => {
                        let result = match event {
                            MasterEvent::Order(order) => executor.handle_order_event(order).await,
                            MasterEvent::Fill(fill) if fill.taker => executor.handle_taker_fill(fill).await,
                            MasterEvent::Fill(_) => Ok(()),
                        };
                        if let Err(e) = result {
                            log::error!("[EXEC] event handling failed: {e}");
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }

    {
        let rebalancer = rebalancer::Rebalancer::new(
            instruments.clone(),
            follower.clone(),
            master.clone(),
            config.followed_users.clone(),
            store.clone(),
            config.trading_mode,
            config.fixed_ratio,
        );
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            rebalancer.run(shutdown, std::time::Duration::from_secs(30)).await;
        });
    }

    {
        let validator = Validator::new(
            mapper.clone(),
            ledger.clone(),
            follower.clone(),
            std::time::Duration::from_secs(24 * 3600),
        );
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            validator.run(shutdown, std::time::Duration::from_secs(300)).await;
        });
    }

    if let Some(ws_url) = config.follower_ws_url.clone() {
        let (follower_tx, mut follower_rx) = mpsc::channel(1024);
        tokio::spawn(async move { follower::run_user_stream(ws_url, follower_tx).await });

        let reconciler = reconciler.clone();
        let mapper_for_stream = mapper.clone();
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(report) = follower_rx.recv() => {
                        if !report.status.is_terminal() {
                            continue;
                        }
                        if mapper_for_stream.lookup_master(&report.follower_order_id).await.unwrap_or(None).is_none() {
                            let filled_size = report.last_fill_size.unwrap_or_default();
                            if !filled_size.is_zero() {
                                if let Err(e) = reconciler
                                    .handle_orphan_fill(&report.follower_order_id, &report.instrument, report.side, filled_size)
                                    .await
                                {
                                    log::error!("[RECONCILE] orphan fill handling failed: {e}");
                                }
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    } else {
        log::warn!("[FOLLOWER] FOLLOWER_WS_URL not set, orphan-fill detection disabled");
    }

    // Graceful shutdown: Ctrl-C broadcasts a stop signal to every
    // supervisory task and gives them a bounded window to drain.
    tokio::signal::ctrl_c().await.ok();
    log::info!("shutdown signal received, draining tasks");
    let _ = shutdown_tx.send(true);
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    log::info!("copier-engine stopped");
    Ok(())
}
