//! Headless netphy game.
//!
//! Usage: `netphy [title|editor|play|server|client]`. Console input is read
//! from stdin, console output goes to stdout. `/exit` quits.

use netphy_net::{Config, GameContext, ModeKind, StateManager, WebSocketNetwork};
use std::io::BufRead;
use std::sync::mpsc;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load()?;
    let initial = match std::env::args().nth(1) {
        Some(arg) => arg.parse::<ModeKind>()?,
        None => ModeKind::Title,
    };
    let tick = config.tick();

    info!("Starting netphy in {} mode...", initial);

    let ctx = GameContext::new(config, Box::new(WebSocketNetwork::new()))?;
    let mut manager = StateManager::new(ctx);
    if let Err(e) = manager.set_active(initial) {
        error!("{}", e);
    }

    // Stdin blocks, so it gets its own thread
    let (tx, rx) = mpsc::channel::<String>();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines().map_while(Result::ok) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    'game: loop {
        let started = Instant::now();

        while let Ok(line) = rx.try_recv() {
            if line.trim() == "/exit" {
                break 'game;
            }
            if let Err(e) = manager.console_input(&line) {
                error!("{}", e);
            }
        }

        if let Err(e) = manager.update() {
            error!("{}", e);
        }
        for line in manager.context_mut().console.take_unread() {
            println!("{line}");
        }

        if let Some(rest) = tick.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    manager.shutdown();
    for line in manager.context_mut().console.take_unread() {
        println!("{line}");
    }
    info!("Goodbye");
    Ok(())
}
