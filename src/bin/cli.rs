//! Kinetic CLI Client
//!
//! Command-line interface for talking to a Kinetic drive.

use clap::{Parser, Subcommand};
use kinetic::protocol::LogType;
use kinetic::{AdminClient, ClientConfig, Entry, KineticClient};
use tracing_subscriber::{fmt, EnvFilter};

/// Kinetic CLI
#[derive(Parser, Debug)]
#[command(name = "kinetic-cli")]
#[command(about = "CLI for Kinetic drives")]
#[command(version)]
struct Args {
    /// Drive host (defaults to KINETIC_HOST or localhost)
    #[arg(long)]
    host: Option<String>,

    /// Drive port (defaults to KINETIC_PORT, 8123, or 8443 with TLS)
    #[arg(short, long)]
    port: Option<u16>,

    /// Identity to authenticate as
    #[arg(short, long)]
    user: Option<i64>,

    /// HMAC key of the identity
    #[arg(short, long)]
    key: Option<String>,

    /// Cluster version to present
    #[arg(short, long, default_value = "0")]
    cluster_version: i64,

    /// Request timeout in milliseconds
    #[arg(short, long, default_value = "30000")]
    timeout_ms: i64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Store a value (forced, ignores the stored version)
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,

        /// Version to stamp on the entry
        #[arg(long, default_value = "")]
        version: String,
    },

    /// Delete a key whatever its version
    Del {
        /// The key to delete
        key: String,
    },

    /// List keys in a range
    Range {
        start: String,
        end: String,

        /// Maximum keys to return
        #[arg(short, long, default_value = "100")]
        max: u32,
    },

    /// Round-trip an empty command
    Noop,

    /// Print the drive log
    Getlog,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    let mut config = ClientConfig::from_env();
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = Some(port);
    }
    if let Some(user) = args.user {
        config.user_id = user;
    }
    if let Some(key) = args.key {
        config.hmac_key = key.into_bytes();
    }
    config.cluster_version = args.cluster_version;
    config.set_request_timeout_ms(args.timeout_ms);

    if let Err(e) = run(config, args.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(config: ClientConfig, command: Commands) -> kinetic::Result<()> {
    match command {
        Commands::Get { key } => {
            let client = KineticClient::connect(config)?;
            match client.get(key.as_bytes())? {
                Some(entry) => {
                    println!("{}", String::from_utf8_lossy(&entry.value));
                    println!("(version: {})", String::from_utf8_lossy(entry.version()));
                }
                None => println!("(nil)"),
            }
            client.close();
        }
        Commands::Put { key, value, version } => {
            let client = KineticClient::connect(config)?;
            let entry = Entry::new(key.into_bytes(), value.into_bytes()).with_version(version.into_bytes());
            client.put_forced(&entry)?;
            println!("OK");
            client.close();
        }
        Commands::Del { key } => {
            let client = KineticClient::connect(config)?;
            if client.delete_forced(key.as_bytes())? {
                println!("(deleted)");
            } else {
                println!("(not found)");
            }
            client.close();
        }
        Commands::Range { start, end, max } => {
            let client = KineticClient::connect(config)?;
            let keys = client.get_key_range(start.as_bytes(), true, end.as_bytes(), true, max, false)?;
            for key in keys {
                println!("{}", String::from_utf8_lossy(&key));
            }
            client.close();
        }
        Commands::Noop => {
            let client = KineticClient::connect(config)?;
            client.noop()?;
            println!("OK");
            client.close();
        }
        Commands::Getlog => {
            let admin = AdminClient::connect(config)?;
            let log = admin.get_log(&LogType::ALL)?;
            println!("{:#?}", log);
            admin.close();
        }
    }
    Ok(())
}
