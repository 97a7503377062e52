use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::config::{ConfigError, SimConfig};

/// Single-core OS simulator: runs each program as a process under a
/// priority scheduler with demand-paged memory.
#[derive(Parser, Debug)]
#[command(name = "ossim", version, about)]
pub struct Cli {
    /// TOML file with machine settings.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Instructions per dispatch.
    #[arg(long)]
    pub quantum: Option<u32>,

    /// Bytes per page.
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Size of the physical page pool.
    #[arg(long)]
    pub physical_pages: Option<usize>,

    /// Priority of the first program; each further program gets one less.
    #[arg(long, default_value_t = 10, allow_negative_numbers = true)]
    pub priority: i32,

    /// Record the execution trace and write it to this file as JSON.
    #[arg(long)]
    pub trace_out: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Program files, one process each.
    #[arg(required = true)]
    pub programs: Vec<PathBuf>,
}

impl Cli {
    /// Config file (or defaults) with command-line overrides applied.
    pub fn sim_config(&self) -> Result<SimConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => SimConfig::from_toml_file(path)?,
            None => SimConfig::default(),
        };
        if let Some(q) = self.quantum {
            config.time_quantum = q;
        }
        if let Some(size) = self.page_size {
            config.page_size = size;
        }
        if let Some(n) = self.physical_pages {
            config.physical_pages = n;
        }
        if self.trace_out.is_some() {
            config.trace = true;
        }
        config.validate()?;
        Ok(config)
    }
}
