//! wol-trigger CLI - start local VMs from Wake-on-LAN packets

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use wol_trigger::listener::WOL_PORT;
use wol_trigger::{daemon, mac_table, packet, Config, MacAddr, Result};

/// Longest accepted debounce window (one hour)
const MAX_DEBOUNCE_SECS: u64 = 3600;

#[derive(Parser)]
#[command(name = "wol-trigger")]
#[command(about = "Start or resume local VMs on Wake-on-LAN", long_about = None)]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen for magic packets and activate matching VMs (default)
    Serve(ServeArgs),

    /// Build the MAC table once and print it
    Table {
        /// VM definitions directory (overridden by VM_CONFIG_DIR)
        config_dir: Option<PathBuf>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Send a magic packet
    Wake {
        /// Target MAC address (aa:bb:cc:dd:ee:ff)
        mac: MacAddr,
        /// Broadcast address to send to
        #[arg(long, default_value_t = Ipv4Addr::BROADCAST)]
        broadcast: Ipv4Addr,
        /// Destination port
        #[arg(long, default_value_t = WOL_PORT)]
        port: u16,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// VM definitions directory (overridden by VM_CONFIG_DIR)
    config_dir: Option<PathBuf>,
    /// Address to listen on
    #[arg(long, default_value_t = Ipv4Addr::UNSPECIFIED)]
    bind: Ipv4Addr,
    /// UDP port to listen on
    #[arg(long, default_value_t = WOL_PORT)]
    port: u16,
    /// Seconds during which repeat packets for the same VM are ignored
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(..=MAX_DEBOUNCE_SECS))]
    debounce_secs: u64,
}

fn info(msg: &str) {
    println!("{} {}", "[INFO]".blue(), msg);
}

fn success(msg: &str) {
    println!("{} {}", "[OK]".green(), msg);
}

fn warn(msg: &str) {
    println!("{} {}", "[WARN]".yellow(), msg);
}

fn error(msg: &str) {
    eprintln!("{} {}", "[ERROR]".red(), msg);
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn cmd_serve(args: ServeArgs) -> Result<()> {
    init_logging();

    let config = Config {
        bind: SocketAddrV4::new(args.bind, args.port),
        cooldown: Duration::from_secs(args.debounce_secs),
        ..Config::from_env(args.config_dir)
    };
    daemon::run(config).await
}

async fn cmd_table(config_dir: Option<PathBuf>, json: bool) -> Result<()> {
    init_logging();

    let config = Config::from_env(config_dir);
    let table = mac_table::build(&config.config_dir).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&table)?);
        return Ok(());
    }

    info(&format!("MAC addresses from {}:", config.config_dir.display()));
    println!();
    println!("{:<20} {}", "MAC", "VMID");
    println!("{:<20} {}", "---", "----");
    for (mac, id) in table.iter() {
        println!("{:<20} {}", mac.to_string(), id);
    }
    println!();

    if table.is_empty() {
        warn("No network interfaces with a MAC address found");
    } else {
        success(&format!("{} MAC address(es) mapped", table.len()));
    }
    Ok(())
}

fn cmd_wake(mac: MacAddr, broadcast: Ipv4Addr, port: u16) -> Result<()> {
    let target = SocketAddrV4::new(broadcast, port);
    info(&format!("Sending magic packet for {} to {}...", mac, target));
    packet::send_magic_packet(mac, target)?;
    success("Magic packet sent");
    Ok(())
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None => cmd_serve(cli.serve).await,
        Some(Commands::Serve(args)) => cmd_serve(args).await,
        Some(Commands::Table { config_dir, json }) => cmd_table(config_dir, json).await,
        Some(Commands::Wake {
            mac,
            broadcast,
            port,
        }) => cmd_wake(mac, broadcast, port),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}
