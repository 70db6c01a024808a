//! rpr-bridge - standalone bridge host and command-line client.
//!
//! `serve` runs a bridge server over a demo project, ticking it from a
//! fixed-interval loop the way an embedding host would tick it once per frame.
//! `bench` and `call` are clients for a running server.

mod host;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use rpr_bridge_core::config::ServerDefaults;
use rpr_bridge_core::{BridgeClient, Server, ServerConfig};
use serde_json::Value;
use std::cell::RefCell;
use std::net::{SocketAddr, ToSocketAddrs};
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "rpr-bridge")]
#[command(about = "Length-prefixed JSON RPC bridge to a host function registry")]
struct Args {
    /// Port to listen on or connect to
    #[arg(short, long, default_value_t = ServerDefaults::PORT, global = true)]
    port: u16,

    /// Host to bind to or connect to
    #[arg(long, default_value = ServerDefaults::HOST, global = true)]
    host: String,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the demo project until Ctrl-C (default)
    Serve(ServeArgs),
    /// Time marker round trips with and without hold
    Bench {
        /// Markers to add and delete per mode
        #[arg(short = 'n', long, default_value_t = 100)]
        count: usize,
    },
    /// Call one function and print its result as JSON
    Call {
        /// Function name, e.g. RPR_GetAppVersion
        name: String,
        /// Arguments as JSON values; bare words are sent as strings
        args: Vec<String>,
    },
}

#[derive(ClapArgs, Debug)]
struct ServeArgs {
    /// Milliseconds between ticks
    #[arg(long, default_value_t = 30)]
    tick_interval_ms: u64,

    /// Only functions with this name prefix may be called ("" allows all)
    #[arg(long, default_value = "RPR_")]
    allowed_prefix: String,

    /// Largest accepted message body in bytes
    #[arg(long)]
    max_message_size: Option<usize>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug, args.log_json);

    match args.command {
        Some(Command::Serve(serve_args)) => serve(&args.host, args.port, serve_args),
        None => serve(
            &args.host,
            args.port,
            ServeArgs {
                tick_interval_ms: 30,
                allowed_prefix: "RPR_".to_string(),
                max_message_size: None,
            },
        ),
        Some(Command::Bench { count }) => bench(resolve(&args.host, args.port)?, count),
        Some(Command::Call { name, args: call_args }) => {
            call(resolve(&args.host, args.port)?, &name, &call_args)
        }
    }
}

fn init_logging(debug: bool, json: bool) {
    let log_level = if debug { LevelFilter::DEBUG } else { LevelFilter::INFO };
    // RUST_LOG directives are layered over the --debug default.
    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn serve(bind_host: &str, port: u16, args: ServeArgs) -> Result<()> {
    info!("Starting rpr-bridge server");

    let mut config = ServerConfig::new(bind_host, port);
    if !args.allowed_prefix.is_empty() {
        config = config.with_allowed_prefix(args.allowed_prefix);
    }
    if let Some(max) = args.max_message_size {
        config = config.with_max_message_size(max);
    }

    let project = Rc::new(RefCell::new(host::Project::default()));
    let registry = host::demo_registry(Rc::clone(&project));
    let mut server = Server::new(config, Box::new(registry))?;

    let signal = server.shutdown_signal();
    ctrlc::set_handler(move || signal.trigger()).context("failed to install Ctrl-C handler")?;

    // Intentional stdout so scripts can pick up an auto-assigned port.
    println!("RPC_PORT={}", server.local_addr().port());

    let interval = Duration::from_millis(args.tick_interval_ms);
    while !server.is_shut_down() {
        let report = server.tick();
        if report.held {
            debug!("Hold served {} messages in one tick", report.messages_handled);
        }
        thread::sleep(interval);
    }

    let project = project.borrow();
    let (total, markers, regions) = project.counts();
    info!(
        "Shutdown signal received, exiting ({} markers, {} regions left of {}; {} console messages)",
        markers,
        regions,
        total,
        project.console().len()
    );
    Ok(())
}

fn bench(addr: SocketAddr, count: usize) -> Result<()> {
    let mut client = BridgeClient::new(addr);
    client
        .connect()
        .with_context(|| format!("failed to connect to {}", addr))?;

    let start = Instant::now();
    {
        let mut held = client.hold()?;
        add_then_delete(&mut held, count, "hold", 0.0)?;
        held.release()?;
    }
    println!("hold_elapsed_seconds: {:.6}", start.elapsed().as_secs_f64());

    let start = Instant::now();
    add_then_delete(&mut client, count, "nohold", 0.5)?;
    println!("no_hold_elapsed_seconds: {:.6}", start.elapsed().as_secs_f64());

    client.close();
    Ok(())
}

fn add_then_delete(client: &mut BridgeClient, count: usize, label: &str, offset: f64) -> Result<()> {
    let mut indices = Vec::with_capacity(count);
    for i in 0..count {
        let idx = client.call(
            "RPR_AddProjectMarker",
            vec![
                0.into(),
                0.into(),
                (i as f64 + offset).into(),
                0.into(),
                format!("{}{}", label, i + 1).into(),
                (i + 1).into(),
            ],
        )?;
        indices.push(idx);
    }
    for idx in indices {
        client.call("RPR_DeleteProjectMarker", vec![0.into(), idx, 0.into()])?;
    }
    Ok(())
}

fn call(addr: SocketAddr, name: &str, raw_args: &[String]) -> Result<()> {
    let args = raw_args.iter().map(|raw| parse_arg(raw)).collect();
    let mut client = BridgeClient::new(addr);
    let value = client.call(name, args)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve {}:{}", host, port))?
        .next()
        .with_context(|| format!("no address for {}:{}", host, port))
}
