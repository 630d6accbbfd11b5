//! Command-line interface for the swarmdir registry status API.

use anyhow::{Context, Result};

mod cmd;

const DEFAULT_PORT: u16 = 9091;

fn print_usage() {
    println!("Usage: swarmdir-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  status        Show registry counters and uptime");
    println!("  peers         List registered peers");
    println!("  peer <name>   Show one peer");
    println!("  files         List announced files");
    println!();
    println!("Options:");
    println!("  --port <port>   Status API port (default: {})", DEFAULT_PORT);
}

/// Split `--port N` from the remaining words.
fn parse_args(args: &[String]) -> Result<(u16, Vec<&str>)> {
    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }
    Ok((port, remaining))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (port, remaining) = parse_args(&args)?;

    match remaining.as_slice() {
        ["status"] | [] => cmd::status::cmd_status(port).await,
        ["peers"] => cmd::status::cmd_peers(port).await,
        ["peer", name] => cmd::status::cmd_peer(port, name).await,
        ["files"] => cmd::files::cmd_files(port).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
