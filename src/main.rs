//! PrismDB - an encrypted, versioned key-value store
//!
//! This is the main entry point for the PrismDB command-line interface.

use std::path::PathBuf;
use std::process::ExitCode;

use prismdb::db::{BackendKind, Database, DatabaseConfig, Outcome, Repl};
use prismdb::storage::Backend;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    // defaults come from the environment, flags override them
    let mut config = DatabaseConfig::from_env();
    let mut execute: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-d" | "--database" => {
                i += 1;
                match args.get(i) {
                    Some(path) => config.path = PathBuf::from(path),
                    None => return missing_value(&args[i - 1]),
                }
            }
            "-e" | "--execute" => {
                i += 1;
                match args.get(i) {
                    Some(line) => execute.push(line.clone()),
                    None => return missing_value(&args[i - 1]),
                }
            }
            "--memory" => {
                config.backend = BackendKind::Memory;
            }
            "--ephemeral-keys" => {
                config.ephemeral_keys = true;
            }
            "-v" | "--verbose" => {
                config.verbose = true;
            }
            "-h" | "--help" => {
                print_help();
                return ExitCode::SUCCESS;
            }
            "--version" => {
                println!("PrismDB v{}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            arg => {
                eprintln!("Unknown option: {}", arg);
                return ExitCode::FAILURE;
            }
        }
        i += 1;
    }

    init_logging(config.verbose);

    let result = match config.backend {
        BackendKind::Git => Database::open_with_config(config).map(|db| run(db, &execute)),
        BackendKind::Memory => Database::in_memory(config).map(|db| run(db, &execute)),
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error opening database: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "prismdb=debug" } else { "prismdb=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run<B: Backend>(db: Database<B>, execute: &[String]) -> ExitCode {
    let mut repl = Repl::new(db);

    if execute.is_empty() {
        return match repl.run() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    // each -e line runs in order against the same session
    for line in execute {
        match repl.run_line(line) {
            Ok(Outcome::Quit) => break,
            Ok(outcome) => println!("{}", outcome),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}

fn missing_value(flag: &str) -> ExitCode {
    eprintln!("Missing value for {}", flag);
    ExitCode::FAILURE
}

fn print_help() {
    println!("PrismDB - an encrypted, versioned key-value store");
    println!();
    println!("Usage: prismdb [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -d, --database PATH    Object store path (default: $PRISMDB_PATH or ~/.prismdb)");
    println!("  -e, --execute CMD      Run a command and exit; repeat to run several");
    println!("      --memory           Keep objects in memory instead of a git repository");
    println!("      --ephemeral-keys   Generate throwaway keys instead of using the keystore");
    println!("  -v, --verbose          Enable debug logging");
    println!("  -h, --help             Show this help message");
    println!("      --version          Show version");
    println!();
    println!("Environment:");
    println!("  PRISMDB_PATH           Default object store path");
    println!("  PRISMDB_KEYSTORE       Key directory (default: <path>/keystore)");
    println!("  RUST_LOG               Log filter, overrides --verbose");
    println!();
    println!("Examples:");
    println!("  prismdb                                        Start the REPL");
    println!("  prismdb -e 'create inventory' -e 'set color blue' -e save");
}
