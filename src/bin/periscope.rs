use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand, ValueEnum};
use periscope::{Engine, PeriscopeConfig, PrefixRecord, Refresher, SnapshotStore};
use serde_json::json;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tracing::Level;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.periscope/periscope.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// Print debug information
    #[clap(long)]
    debug: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, Default, ValueEnum)]
enum OutputFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Pretty-printed JSON
    Pretty,
    /// Table format
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve an IP address to its covering BGP prefix and RIR allocation
    Ip {
        /// IP address to look up
        address: IpAddr,

        /// Output format
        #[clap(short, long, default_value = "json")]
        format: OutputFormat,
    },

    /// Show peers, upstreams, and prefixes of an ASN
    Asn {
        /// AS number to look up
        asn: u32,

        /// Output format
        #[clap(short, long, default_value = "json")]
        format: OutputFormat,
    },

    /// Run one ingestion cycle from the configured feeds and report counts
    Refresh,

    /// Print the effective configuration
    Config,
}

/// Table row for a prefix record
#[derive(Tabled)]
struct PrefixRow {
    prefix: String,
    origin_asn: u32,
}

impl From<&PrefixRecord> for PrefixRow {
    fn from(record: &PrefixRecord) -> Self {
        PrefixRow {
            prefix: record.prefix.to_string(),
            origin_asn: record.origin_asn,
        }
    }
}

/// Build a store and run one refresh cycle against the configured feeds
fn load_engine(config: &PeriscopeConfig) -> Result<Engine> {
    if config.bgp_dump.is_empty() {
        return Err(anyhow!(
            "no BGP dump configured; set bgp_dump in {} or PERISCOPE_BGP_DUMP",
            PeriscopeConfig::config_file_path()
        ));
    }
    let store = Arc::new(SnapshotStore::new());
    let refresher = Refresher::new(Arc::clone(&store), config.refresh_settings());
    refresher.run_once()?;
    Ok(Engine::new(store))
}

fn main() {
    let cli = Cli::parse();

    if cli.debug {
        tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();
    } else {
        tracing_subscriber::fmt().with_max_level(Level::INFO).init();
    }
    let _ = dotenvy::dotenv();

    let config = match PeriscopeConfig::new(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Ip { address, format } => run_ip(&config, address, format),
        Commands::Asn { asn, format } => run_asn(&config, asn, format),
        Commands::Refresh => run_refresh(&config),
        Commands::Config => {
            println!("{}", config.summary());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run_ip(config: &PeriscopeConfig, address: IpAddr, format: OutputFormat) -> Result<()> {
    let engine = load_engine(config)?;
    let report = engine.resolve_ip(&address);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(&report)?),
        OutputFormat::Pretty => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Table => {
            match &report.prefix {
                Some(prefix) => println!(
                    "prefix:     {} (AS{})",
                    prefix.prefix, prefix.origin_asn
                ),
                None => println!("prefix:     no covering BGP route"),
            }
            match &report.allocation {
                Some(block) => println!(
                    "allocation: {} ({}, {})",
                    block.prefix, block.rir, block.country
                ),
                None => println!("allocation: unallocated"),
            }
        }
    }
    Ok(())
}

fn run_asn(config: &PeriscopeConfig, asn: u32, format: OutputFormat) -> Result<()> {
    let engine = load_engine(config)?;
    let report = engine.describe_asn(asn);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(&report)?),
        OutputFormat::Pretty => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Table => {
            println!(
                "AS{}: {} peers, {} upstreams",
                asn,
                report.peers.len(),
                report.upstreams.len()
            );
            let peers: Vec<String> = report.peers.iter().map(|p| format!("AS{p}")).collect();
            if !peers.is_empty() {
                println!("peers:     {}", peers.join(", "));
            }
            let ups: Vec<String> = report.upstreams.iter().map(|p| format!("AS{p}")).collect();
            if !ups.is_empty() {
                println!("upstreams: {}", ups.join(", "));
            }
            if !report.prefixes.is_empty() {
                let rows: Vec<PrefixRow> = report.prefixes.iter().map(PrefixRow::from).collect();
                println!("{}", Table::new(rows).with(Style::rounded()));
            }
        }
    }
    Ok(())
}

fn run_refresh(config: &PeriscopeConfig) -> Result<()> {
    let engine = load_engine(config)?;
    let stats = engine.snapshot_stats();
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "v4_prefixes": stats.v4_prefixes,
            "v6_prefixes": stats.v6_prefixes,
            "v4_allocations": stats.v4_allocations,
            "v6_allocations": stats.v6_allocations,
            "asn_count": stats.asn_count,
            "built_at": stats.built_at,
        }))?
    );
    Ok(())
}
