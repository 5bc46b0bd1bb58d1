use clap::{Parser, Subcommand};
use simplechain::{Blockchain, FileStore};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "simplechain",
    version,
    about = "Append-only hash-chained block ledger"
)]
struct Cli {
    /// Chain data directory
    #[arg(long, default_value = "chaindata")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the chain (writes the genesis block if empty)
    Init,
    /// Append a block
    Append {
        payload: String,
        /// Parse the payload as JSON instead of storing it as a string
        #[arg(long)]
        json: bool,
    },
    /// Print the block at a height
    Get { height: u64 },
    /// Print the current chain height
    Height,
    /// List every block in height order
    List,
    /// Validate one block or the whole chain
    Validate {
        /// Only validate this height
        #[arg(long)]
        height: Option<u64>,
    },
    /// Append blocks on a timer, then validate the chain
    Demo {
        #[arg(long, default_value = "10")]
        count: u32,
        #[arg(long, default_value = "100")]
        interval_ms: u64,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init => cmd_init(&cli.db),
        Commands::Append { payload, json } => cmd_append(&cli.db, &payload, json),
        Commands::Get { height } => cmd_get(&cli.db, height),
        Commands::Height => cmd_height(&cli.db),
        Commands::List => cmd_list(&cli.db),
        Commands::Validate { height } => cmd_validate(&cli.db, height),
        Commands::Demo { count, interval_ms } => cmd_demo(&cli.db, count, interval_ms),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

type CmdResult = Result<bool, Box<dyn std::error::Error>>;

fn open(path: &Path) -> Result<Blockchain<FileStore>, Box<dyn std::error::Error>> {
    let chain = Blockchain::new(FileStore::open(path)?);
    chain.initialize()?;
    Ok(chain)
}

fn print_height(chain: &Blockchain<FileStore>) -> Result<(), Box<dyn std::error::Error>> {
    match chain.current_height()? {
        Some(h) => println!("{}", h),
        None => println!("-1"),
    }
    Ok(())
}

fn cmd_init(path: &Path) -> CmdResult {
    let chain = open(path)?;
    println!("Initialized chain at {}", path.display());
    print_height(&chain)?;
    Ok(true)
}

fn cmd_append(path: &Path, payload: &str, json: bool) -> CmdResult {
    let chain = open(path)?;
    let block = if json {
        let value: serde_json::Value = serde_json::from_str(payload)?;
        chain.append(&value)?
    } else {
        chain.append(payload)?
    };
    println!("{}", serde_json::to_string_pretty(&block)?);
    Ok(true)
}

fn cmd_get(path: &Path, height: u64) -> CmdResult {
    let chain = open(path)?;
    let block = chain.get_block(height)?;
    println!("{}", serde_json::to_string_pretty(&block)?);
    Ok(true)
}

fn cmd_height(path: &Path) -> CmdResult {
    let chain = open(path)?;
    print_height(&chain)?;
    Ok(true)
}

fn cmd_list(path: &Path) -> CmdResult {
    let chain = open(path)?;
    for block in chain.blocks()? {
        let short = block.hash.get(..8).unwrap_or(&block.hash);
        println!("[{}] {} {}", block.height, short, block.body);
    }
    Ok(true)
}

fn cmd_validate(path: &Path, height: Option<u64>) -> CmdResult {
    let chain = open(path)?;
    if let Some(h) = height {
        let check = chain.check_block(h)?;
        if check.is_valid() {
            println!("Block #{} valid", h);
        } else {
            println!(
                "Block #{} invalid hash:\n{}<>{}",
                h, check.stored_hash, check.computed_hash
            );
        }
        return Ok(check.is_valid());
    }
    let report = chain.validate_chain()?;
    print!("{}", report);
    Ok(report.is_valid())
}

fn cmd_demo(path: &Path, count: u32, interval_ms: u64) -> CmdResult {
    let chain = open(path)?;
    for i in (1..=count).rev() {
        thread::sleep(Duration::from_millis(interval_ms));
        let block = chain.append(&format!("Block {} added to the store", i))?;
        println!("[{}] {}", block.height, &block.hash[..8]);
    }
    let report = chain.validate_chain()?;
    print!("{}", report);
    Ok(report.is_valid())
}
