use std::path::PathBuf;

use anyhow::Result;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use where_to_go::{
    init_tracing, AppConfig, DiscoveryEngine, DiscoverySnapshot, EnginePhase, GeoService,
    TelemetryClient, VenueService,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = AppConfig::from_env();
    let data_dir = config
        .data_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(".wheretogo"));

    let telemetry = TelemetryClient::new(&data_dir, &config)?;
    if let Err(err) = telemetry.record(
        "app_start",
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "config": config.public_profile(),
        }),
    ) {
        warn!(?err, "failed to queue telemetry bootstrap event");
    }

    let geo = GeoService::new(&config);
    let venues = VenueService::new(&config);
    let engine = DiscoveryEngine::new(geo, venues, telemetry.clone(), &config);

    println!("where-to-go: roll the dice on a nearby restaurant");
    println!("commands: roll | again | history | quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print_prompt(&engine.snapshot());
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim().to_ascii_lowercase().as_str() {
            "roll" | "r" => {
                engine.request_discovery().await?;
                render(&engine.snapshot());
            }
            "again" | "a" => {
                engine.request_reroll().await?;
                render(&engine.snapshot());
            }
            "history" | "h" => render_history(&engine.snapshot()),
            "quit" | "q" | "exit" => break,
            "" => {}
            other => println!("unknown command: {other}"),
        }
    }

    if let Err(err) = telemetry.flush() {
        warn!(?err, "failed to flush telemetry queue");
    }
    Ok(())
}

fn print_prompt(snapshot: &DiscoverySnapshot) {
    if snapshot.can_reroll() {
        print!("[{} rerolls left] > ", snapshot.remaining_rerolls);
    } else {
        print!("> ");
    }
    use std::io::Write;
    let _ = std::io::stdout().flush();
}

fn render(snapshot: &DiscoverySnapshot) {
    if snapshot.phase.is_in_flight() {
        println!("still working...");
        return;
    }
    if snapshot.phase.is_terminal_error() {
        let reason = snapshot.last_error.as_deref().unwrap_or("unknown error");
        println!("no luck: {reason}");
        println!("try `roll` again later");
        return;
    }
    let Some(venue) = &snapshot.current else {
        println!("nothing rolled yet; try `roll`");
        return;
    };

    println!();
    println!("  {}", venue.name);
    if let Some(category) = &venue.category {
        println!("  {category}");
    }
    if let Some(label) = &venue.rating_label {
        println!("  rated {label}");
    }
    if !venue.address.is_empty() {
        println!("  {}", venue.address.join(", "));
    }
    if let Some(url) = &venue.canonical_url {
        println!("  {url}");
    }
    if venue.degraded {
        println!("  (details were unavailable; showing basics)");
    }
    println!();
    if snapshot.phase == EnginePhase::Settled && !snapshot.can_reroll() {
        println!("  no rerolls left; `roll` starts over");
    }
}

fn render_history(snapshot: &DiscoverySnapshot) {
    if snapshot.history.is_empty() {
        println!("no picks yet this session");
        return;
    }
    println!("past results (newest first):");
    for venue in &snapshot.history {
        println!("  - {}", venue.name);
    }
}
