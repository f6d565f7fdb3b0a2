//! Moonshot demo driver.
//!
//! Runs complete crash rounds against the in-memory engine with simulated
//! players, logging events and the post-round fairness check.

use clap::Parser;
use moonshot::{
    fairness,
    ledger::display_units,
    EngineConfig, EntropyConfig, GameEvent, Ledger, MemorySink, RoundEngine,
};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "moonshot", about = "Provably fair crash rounds, demo run")]
struct Options {
    /// Number of rounds to play.
    #[arg(long, default_value_t = 3)]
    rounds: u32,

    /// Number of simulated players.
    #[arg(long, default_value_t = 4)]
    players: u32,

    /// Stake per player per round, in cents.
    #[arg(long, default_value_t = 500)]
    bet_cents: u64,

    /// Round length in milliseconds.
    #[arg(long, default_value_t = 4_000)]
    round_length_ms: u64,

    /// Optional block-hash endpoint for client seeds.
    #[arg(long)]
    entropy_endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let options = Options::parse();
    let config = EngineConfig {
        countdown_interval_ms: 500,
        default_round_length_ms: options.round_length_ms,
        entropy: EntropyConfig {
            endpoint: options.entropy_endpoint.clone(),
            ..Default::default()
        },
        ..Default::default()
    };

    let engine = RoundEngine::new(config, Ledger::new(), Arc::new(MemorySink::new()))?;

    let player_names: Vec<String> = (1..=options.players)
        .map(|i| format!("player-{}", i))
        .collect();
    for name in &player_names {
        engine.adjust_balance(name, 100_000).await?;
    }

    for round_no in 1..=options.rounds {
        let snapshot = engine.create_round("demo", "host", None).await?;
        let id = snapshot.id;
        info!(
            round = round_no,
            round_id = %id,
            client_seed = %snapshot.client_seed,
            nonce = snapshot.nonce,
            "Round created"
        );

        for name in &player_names {
            engine.place_bet(id, name, options.bet_cents).await?;
        }

        // Each player tries to cash out at a personal target multiplier.
        let mut tasks = Vec::new();
        for (i, name) in player_names.iter().enumerate() {
            let engine = engine.clone();
            let name = name.clone();
            let target = 110 + i as u64 * 40;
            let mut rx = engine.events().subscribe();

            tasks.push(tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(GameEvent::MultiplierTick {
                            id: tick_id,
                            multiplier_centi,
                        }) if tick_id == id && multiplier_centi >= target => {
                            match engine.cashout(id, &name).await {
                                Ok(receipt) => info!(
                                    player = %name,
                                    multiplier = display_units(receipt.multiplier_centi),
                                    payout = display_units(receipt.payout),
                                    "Cashed out"
                                ),
                                Err(err) => debug!(player = %name, error = %err, "Cashout refused"),
                            }
                            break;
                        }
                        Ok(GameEvent::RoundCrashed { id: crash_id, .. }) if crash_id == id => {
                            break;
                        }
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(player = %name, skipped, "Event stream lagged");
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }));
        }

        let mut rx = engine.events().subscribe();
        engine.start_round(id)?;
        loop {
            match rx.recv().await {
                Ok(GameEvent::RoundCrashed {
                    id: crash_id,
                    crash_centi,
                }) if crash_id == id => {
                    info!(crash = display_units(crash_centi), "Round crashed");
                    break;
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
        for task in tasks {
            let _ = task.await;
        }

        if let Some(record) = engine.history().find(id) {
            let verified = fairness::verify(
                &record.server_seed,
                &record.client_seed,
                record.nonce,
                record.crash_centi,
            );
            info!(
                round_id = %id,
                crash = display_units(record.crash_centi),
                verified,
                "Fairness check"
            );
        }
    }

    for name in &player_names {
        info!(
            player = %name,
            balance = display_units(engine.balance(name)),
            "Final balance"
        );
    }

    Ok(())
}
