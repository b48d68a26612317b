//! SigilDB CLI
//!
//! Command-line tool for SigilDB stores.
//!
//! # Commands
//!
//! - `init` - Create a store and its keys
//! - `put` / `get` / `list` / `search` / `delete` - Work with documents
//! - `export` / `import` - Move document subtrees in and out as JSON or TOML
//! - `serve` - Host the store for other replicas
//! - `sync` - Keep the store connected to a server
//! - `info` - Show identity, peers and the state digest

mod commands;
mod error;

use clap::{Parser, Subcommand};
use commands::transfer::Format;
use error::{CliError, CliResult};
use sigildb_core::Config;
use sigildb_sync_server::DEFAULT_PORT;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// SigilDB command-line tool.
#[derive(Parser)]
#[command(name = "sigildb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new store with fresh keys
    Init {
        /// Server to sync with by default
        #[arg(short, long)]
        server: Option<String>,
    },

    /// Write a document given as JSON
    Put {
        /// The document, e.g. '{"type":"note","title":"hi"}'
        json: String,
    },

    /// Print a document
    Get {
        /// Document id
        id: String,

        /// Show tombstones and orphans as stored
        #[arg(short, long)]
        raw: bool,
    },

    /// List documents of a type, newest first
    List {
        /// Document type
        doc_type: String,

        /// Only children of this document
        #[arg(long)]
        parent: Option<String>,

        /// Maximum number of documents
        #[arg(short, long, default_value = "100")]
        limit: usize,
    },

    /// Full-text search within a type
    Search {
        /// Search query
        query: String,

        /// Document type
        doc_type: String,

        /// Only children of this document
        #[arg(long)]
        parent: Option<String>,

        /// Maximum number of results
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Delete a document
    Delete {
        /// Document id
        id: String,

        /// Delete the whole subtree on every replica
        #[arg(short, long)]
        burn: bool,
    },

    /// Export documents with their ancestors and descendants
    Export {
        /// Document ids
        #[arg(required = true)]
        ids: Vec<String>,

        /// Export as TOML instead of JSON
        #[arg(short, long)]
        toml: bool,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import a JSON or TOML export
    Import {
        /// Export file; `.toml` files are read as TOML
        file: PathBuf,
    },

    /// Host the store for other replicas
    Serve {
        /// Address to listen on
        #[arg(default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)))]
        bind: SocketAddr,

        /// Maximum concurrent connections
        #[arg(long, default_value = "1000")]
        max_connections: usize,
    },

    /// Keep the store synced with a server
    Sync {
        /// Server address; defaults to the one configured at init
        address: Option<String>,

        /// Give up after this many consecutive failed attempts
        #[arg(long)]
        max_attempts: Option<u32>,
    },

    /// Show identity, peers and the state digest
    Info {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Init { .. } => "init",
            Commands::Put { .. } => "put",
            Commands::Get { .. } => "get",
            Commands::List { .. } => "list",
            Commands::Search { .. } => "search",
            Commands::Delete { .. } => "delete",
            Commands::Export { .. } => "export",
            Commands::Import { .. } => "import",
            Commands::Serve { .. } => "serve",
            Commands::Sync { .. } => "sync",
            Commands::Info { .. } => "info",
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins over -v.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "debug" } else { "info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> CliResult<()> {
    let name = cli.command.name();
    let path = cli.path.ok_or(CliError::MissingPath(name))?;
    let mut out = io::stdout().lock();

    if let Commands::Init { server } = &cli.command {
        commands::init::run(&path, Config::new(), server.as_deref(), &mut out)?.close();
        return Ok(());
    }

    let store = commands::open(&path)?;
    match cli.command {
        Commands::Init { .. } => {}
        Commands::Put { json } => commands::documents::put(&store, &json, &mut out)?,
        Commands::Get { id, raw } => commands::documents::get(&store, &id, raw, &mut out)?,
        Commands::List {
            doc_type,
            parent,
            limit,
        } => {
            commands::documents::list(&store, &doc_type, parent.as_deref(), limit, &mut out)?;
        }
        Commands::Search {
            query,
            doc_type,
            parent,
            limit,
        } => {
            commands::documents::search(&store, &query, &doc_type, parent.as_deref(), limit, &mut out)?;
        }
        Commands::Delete { id, burn } => commands::documents::delete(&store, &id, burn, &mut out)?,
        Commands::Export { ids, toml, output } => {
            let format = if toml { Format::Toml } else { Format::Json };
            match output {
                Some(file) => {
                    let mut file = std::fs::File::create(file)?;
                    commands::transfer::export(&store, &ids, format, &mut file)?;
                }
                None => commands::transfer::export(&store, &ids, format, &mut out)?,
            }
        }
        Commands::Import { file } => {
            commands::transfer::import(&store, &file, &mut out)?;
        }
        Commands::Serve {
            bind,
            max_connections,
        } => {
            drop(out);
            return runtime()?.block_on(commands::network::serve(store, bind, max_connections));
        }
        Commands::Sync {
            address,
            max_attempts,
        } => {
            drop(out);
            return runtime()?.block_on(commands::network::sync(store, address, max_attempts));
        }
        Commands::Info { format } => commands::info::run(&store, &format, &mut out)?,
    }
    store.close();
    Ok(())
}

fn runtime() -> CliResult<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread().enable_all().build()?)
}
