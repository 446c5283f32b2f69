use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "trellis", about = "Trellis object store administration", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Container config (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show store metadata and slot statistics
    Inspect(StoreArgs),
    /// Bring an older store up to the current converter version
    Convert(StoreArgs),
    /// Rewrite the store file keeping only live slots
    Compact(StoreArgs),
    /// Print stored objects
    Dump(DumpArgs),
    /// Store a new record
    Put(PutArgs),
    /// Delete an object and cascade to its references
    Delete(DeleteArgs),
}

#[derive(Args)]
pub struct StoreArgs {
    pub path: PathBuf,
}

#[derive(Args)]
pub struct DumpArgs {
    pub path: PathBuf,
    /// Only this object id
    #[arg(long)]
    pub id: Option<u64>,
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Args)]
pub struct PutArgs {
    pub path: PathBuf,
    pub class: String,
    /// Fields as `name=value`; `@N` links object N, integers and
    /// `true`/`false` are typed, anything else is text
    pub fields: Vec<String>,
}

#[derive(Args)]
pub struct DeleteArgs {
    pub path: PathBuf,
    pub id: u64,
    #[arg(short, long, default_value = "0")]
    pub depth: u32,
}
