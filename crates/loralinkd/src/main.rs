//! loralinkd — send and receive messages and files over a LoRa serial modem.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;

use loralink_core::LinkConfig;
use loralink_services::{PayloadDispatcher, Session};

mod console;
mod serial;

// ── Arguments ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Options {
    port: Option<String>,
    baud: Option<u32>,
    out: Option<PathBuf>,
    json: bool,
}

fn parse_args(args: &[String]) -> Result<(Options, Vec<&str>)> {
    let mut options = Options::default();
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                i += 1;
                options.port = Some(args.get(i).context("--port requires a value")?.clone());
            }
            "--baud" => {
                i += 1;
                options.baud = Some(
                    args.get(i)
                        .context("--baud requires a value")?
                        .parse()
                        .context("--baud must be a number")?,
                );
            }
            "--out" => {
                i += 1;
                options.out = Some(PathBuf::from(args.get(i).context("--out requires a value")?));
            }
            "--json" => options.json = true,
            other => remaining.push(other),
        }
        i += 1;
    }
    Ok((options, remaining))
}

fn print_usage() {
    println!("Usage: loralinkd [--port <dev>] [--baud <n>] [--out <dir>] <command>");
    println!();
    println!("Commands:");
    println!("  listen [--json]   Receive until Ctrl-C, printing messages and events");
    println!("  send <file>       Send one file");
    println!("  text <words...>   Send a text message");
    println!("  config            Write the default config file if missing, print its path");
    println!();
    println!("Options:");
    println!("  --port <dev>   Serial device (default from config)");
    println!("  --baud <n>     Baud rate (default from config)");
    println!("  --out <dir>    Where received files are written");
}

// ── Setup ─────────────────────────────────────────────────────────────────────

fn load_config(options: &Options) -> LinkConfig {
    let mut config = LinkConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        LinkConfig::default()
    });
    if let Some(port) = &options.port {
        config.serial.port = port.clone();
    }
    if let Some(baud) = options.baud {
        config.serial.baud = baud;
    }
    if let Some(out) = &options.out {
        config.output.dir = out.clone();
    }
    config
}

async fn open_session(config: LinkConfig, dispatcher: PayloadDispatcher) -> Result<Session> {
    let session = Session::new(config, dispatcher).context("invalid configuration")?;
    let serial = &session.config().serial;
    let stream = serial::open(&serial.port, serial.baud, serial.settle())
        .await
        .context("failed to open serial port")?;
    session.open(stream).await?;
    Ok(session)
}

// ── Subcommand handlers ───────────────────────────────────────────────────────

async fn cmd_listen(config: LinkConfig, json: bool) -> Result<()> {
    let mut dispatcher = PayloadDispatcher::new(config.output.dir.clone());
    if !json {
        dispatcher.add_sink(Arc::new(console::ConsoleSink));
    }
    let session = open_session(config, dispatcher).await?;
    let mut events = session.subscribe();
    tracing::info!(out = %session.config().output.dir.display(), "listening");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if json {
                        println!("{}", serde_json::to_string(&event)?);
                    } else if let Some(line) = console::describe(&event) {
                        println!("{line}");
                    }
                    if matches!(event, loralink_services::SessionEvent::ChannelClosed { .. }) {
                        anyhow::bail!("serial channel closed");
                    }
                }
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "event output fell behind"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.close().await;
    Ok(())
}

async fn cmd_send(config: LinkConfig, path: &str) -> Result<()> {
    let dispatcher = PayloadDispatcher::new(config.output.dir.clone());
    let session = open_session(config, dispatcher).await?;
    let result = session.send_file(path).await;
    session.close().await;

    let report = result.with_context(|| format!("failed to send {path}"))?;
    println!(
        "Sent {} ({} bytes) as sequence {} in {} records",
        path, report.bytes, report.sequence, report.records
    );
    Ok(())
}

async fn cmd_text(config: LinkConfig, words: &[&str]) -> Result<()> {
    let text = words.join(" ");
    anyhow::ensure!(!text.is_empty(), "nothing to send");

    let dispatcher = PayloadDispatcher::new(config.output.dir.clone());
    let session = open_session(config, dispatcher).await?;
    let result = session.send_text(&text).await;
    session.close().await;

    let report = result.context("failed to send text")?;
    println!(
        "Sent {} bytes as sequence {} in {} records",
        report.bytes, report.sequence, report.records
    );
    Ok(())
}

fn cmd_config() -> Result<()> {
    let path = LinkConfig::write_default_if_missing().context("failed to write default config")?;
    println!("{}", path.display());
    Ok(())
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (options, remaining) = parse_args(&args)?;

    match remaining.as_slice() {
        ["listen"] => cmd_listen(load_config(&options), options.json).await,
        ["send", path] => cmd_send(load_config(&options), path).await,
        ["text", words @ ..] if !words.is_empty() => cmd_text(load_config(&options), words).await,
        ["config"] => cmd_config(),
        ["help"] | ["--help"] | ["-h"] | [] => {
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
