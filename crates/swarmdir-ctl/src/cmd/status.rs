//! Registry status and peer commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json};

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusResponse {
    peers: usize,
    chunks: usize,
    files: usize,
    relays_in_flight: usize,
    uptime_secs: u64,
}

#[derive(Deserialize)]
struct PeersResponse {
    peers: Vec<PeerInfo>,
}

#[derive(Deserialize)]
struct PeerInfo {
    name: String,
    control_addr: Option<String>,
    relay_addr: Option<String>,
    chunks: usize,
    relay_in_flight: bool,
    registered_secs: u64,
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  swarmdir Registry Status");
    println!("═══════════════════════════════════════");
    println!("  Peers            : {}", resp.peers);
    println!("  Chunks indexed   : {}", resp.chunks);
    println!("  Files            : {}", resp.files);
    println!("  Relays in flight : {}", resp.relays_in_flight);
    println!("  Uptime           : {}", format_duration(resp.uptime_secs));

    Ok(())
}

pub async fn cmd_peers(port: u16) -> Result<()> {
    let resp: PeersResponse = get_json(&format!("{}/peers", base_url(port))).await?;

    if resp.peers.is_empty() {
        println!("No peers registered.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Registered Peers ({})", resp.peers.len());
    println!("═══════════════════════════════════════");

    for p in &resp.peers {
        print_peer(p);
    }

    Ok(())
}

pub async fn cmd_peer(port: u16, name: &str) -> Result<()> {
    let p: PeerInfo = get_json(&format!("{}/peers/{}", base_url(port), name)).await?;
    print_peer(&p);
    Ok(())
}

fn print_peer(p: &PeerInfo) {
    let none = "-".to_string();
    println!("  ┌─ {}", p.name);
    println!("  │  control  : {}", p.control_addr.as_ref().unwrap_or(&none));
    println!("  │  relay    : {}", p.relay_addr.as_ref().unwrap_or(&none));
    println!("  │  chunks   : {}", p.chunks);
    println!("  │  relaying : {}", if p.relay_in_flight { "yes" } else { "no" });
    println!("  └─ since    : {} ago", format_duration(p.registered_secs));
}

fn format_duration(secs: u64) -> String {
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => format!("{}m{:02}s", s / 60, s % 60),
        s => format!("{}h{:02}m", s / 3600, (s % 3600) / 60),
    }
}
