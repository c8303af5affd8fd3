use std::path::PathBuf;

use clap::Parser;

use crate::idle::IdleBackend;

#[derive(Parser, Debug)]
#[command(name = "lefocus-tracker")]
#[command(about = "Records foreground activity sessions from host events on stdin")]
#[command(version)]
pub struct Args {
    /// Settings file (defaults to <data dir>/settings.json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// SQLite database (defaults to <data dir>/lefocus-tracker.sqlite3)
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Idle backend: "system" polls the host, "tap" expects `input` events
    #[arg(long, value_parser = parse_backend)]
    pub idle_backend: Option<IdleBackend>,

    /// Run without idle detection
    #[arg(long)]
    pub no_idle: bool,
}

impl Args {
    pub fn data_dir(&self) -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lefocus")
    }

    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| self.data_dir().join("settings.json"))
    }

    pub fn db_path(&self) -> PathBuf {
        self.db
            .clone()
            .unwrap_or_else(|| self.data_dir().join("lefocus-tracker.sqlite3"))
    }
}

fn parse_backend(value: &str) -> Result<IdleBackend, String> {
    IdleBackend::parse(value).ok_or_else(|| format!("unknown idle backend '{value}'"))
}
