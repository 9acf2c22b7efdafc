//! confsync command line tool.
//!
//! Reads, edits and follows configuration files through the same handles the
//! library exposes.

use std::{
    error::Error,
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand};
use confsync::{
    file_config::{ConfigFile, FileConfig, FileNotFoundAction},
    tracing_config::{self, LogFormat},
    watch::WatchRegistry,
};
use toml::{Table, Value};
use tracing::{info, instrument};

#[derive(Parser)]
#[command(name = "confsync")]
#[command(about = "Read, edit and watch configuration files")]
struct Cli {
    /// Console log style; defaults to CONFSYNC_LOG_FORMAT or pretty
    #[arg(long, value_enum, global = true)]
    log_format: Option<LogFormat>,

    /// Also write daily-rotated log files to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the value at a dot-separated path
    Get { file: PathBuf, path: String },
    /// Set the value at a dot-separated path and save the file
    Set {
        file: PathBuf,
        path: String,
        /// TOML literal; anything that does not parse is stored as a string
        value: String,
    },
    /// Reload the file on every change until Ctrl-C
    Watch { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let format = cli.log_format.unwrap_or_else(LogFormat::from_env);
    match &cli.log_dir {
        Some(dir) => tracing_config::init_with_file_as(format, dir)?,
        None => tracing_config::init_console(format)?,
    }

    match cli.command {
        Commands::Get { file, path } => get(&file, &path)?,
        Commands::Set { file, path, value } => set(&file, &path, &value)?,
        Commands::Watch { file } => watch(&file).await?,
    }

    Ok(())
}

#[instrument(skip_all, fields(file = %file.display()))]
fn get(file: &Path, path: &str) -> Result<(), Box<dyn Error>> {
    let config = FileConfig::builder(file)?
        .on_file_not_found(FileNotFoundAction::ThrowError)
        .build()?;
    config.load()?;

    let value = config.get(path)?;
    println!("{value}");

    config.close();
    Ok(())
}

#[instrument(skip_all, fields(file = %file.display()))]
fn set(file: &Path, path: &str, raw: &str) -> Result<(), Box<dyn Error>> {
    let config = FileConfig::builder(file)?.sync_writes().build()?;
    config.load()?;

    let value = parse_literal(raw);
    config.set(path, value)?;
    config.save()?.wait_blocking()?;

    info!(path, "Saved");
    config.close();
    Ok(())
}

async fn watch(file: &Path) -> Result<(), Box<dyn Error>> {
    let config = FileConfig::builder(file)?.build()?;
    config.load()?;
    info!(path = %config.path().display(), content = %render(&config), "Watching config file");

    let registry = WatchRegistry::new()?;
    let target = config.clone();
    registry.add_watch(config.path(), move || {
        let outcome = target.load()?;
        info!(?outcome, content = %render(&target), "Config file changed");
        Ok(())
    })?;

    tokio::signal::ctrl_c().await?;

    registry.remove_watch(config.path());
    registry.stop();
    config.close();
    Ok(())
}

/// Parses a TOML literal, falling back to a plain string.
fn parse_literal(raw: &str) -> Value {
    toml::from_str::<Table>(&format!("value = {raw}"))
        .ok()
        .and_then(|mut table| table.remove("value"))
        .unwrap_or_else(|| Value::String(raw.to_string()))
}

fn render(config: &FileConfig) -> String {
    toml::to_string(&config.tree().snapshot()).unwrap_or_default()
}
