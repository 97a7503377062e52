use std::path::{Path, PathBuf};
use std::process::ExitCode;

use log::{error, info};

use crate::config::{ConfigError, SimConfig};
use crate::loader;
use crate::sim::cpu::{Cpu, RunReport};
use crate::sim::os::proc::Pid;

/// Errors that stop the simulator before or after a run.
///
/// - exit code `2`: bad configuration, unreadable or unwritable files
/// - exit code `1`: nothing to run
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("none of the {count} program(s) could be loaded")]
    NoPrograms { count: usize },

    #[error("cannot write trace to {path}: {source}")]
    TraceWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Config(_) | Self::TraceWrite { .. } | Self::Json(_) => ExitCode::from(2),
            Self::NoPrograms { .. } => ExitCode::from(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedProgram {
    pub path: PathBuf,
    pub pid: Pid,
    pub priority: i32,
}

pub struct Session {
    pub cpu: Cpu,
    pub loaded: Vec<LoadedProgram>,
}

/// Loads every program and creates one process per file. Priorities count
/// down from `start_priority`; a file that fails to load is skipped and
/// does not use up a priority.
pub fn load(
    paths: &[PathBuf],
    config: &SimConfig,
    start_priority: i32,
) -> Result<Session, AppError> {
    let mut cpu = Cpu::new(config);
    let mut loaded = Vec::new();
    let mut priority = start_priority;
    for path in paths {
        let program = match loader::load_program(path) {
            Ok(program) => program,
            Err(e) => {
                error!("Could not load program {}: {}", path.display(), e);
                continue;
            }
        };
        match cpu.create_process(&program, priority) {
            Ok(pid) => {
                info!(
                    "Loaded {} ({} instructions) as process {}",
                    path.display(),
                    program.len(),
                    pid
                );
                loaded.push(LoadedProgram {
                    path: path.clone(),
                    pid,
                    priority,
                });
                priority -= 1;
            }
            Err(fault) => error!("Could not create process for {}: {}", path.display(), fault),
        }
    }
    if loaded.is_empty() {
        return Err(AppError::NoPrograms { count: paths.len() });
    }
    Ok(Session { cpu, loaded })
}

pub fn run(
    paths: &[PathBuf],
    config: &SimConfig,
    start_priority: i32,
) -> Result<(Session, RunReport), AppError> {
    let mut session = load(paths, config, start_priority)?;
    info!("--- Starting OS Execution ---");
    let report = session.cpu.run();
    Ok((session, report))
}

pub fn write_trace(cpu: &Cpu, path: &Path) -> Result<(), AppError> {
    let json = cpu.trace().to_json()?;
    std::fs::write(path, json).map_err(|source| AppError::TraceWrite {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(ExitCode::from(1), AppError::NoPrograms { count: 2 }.exit_code());
        let config = AppError::Config(ConfigError::Invalid("x".to_string()));
        assert_eq!(ExitCode::from(2), config.exit_code());
    }

    #[test]
    fn nothing_to_run() {
        let paths = vec![PathBuf::from("/nonexistent/a.txt")];
        match load(&paths, &SimConfig::default(), 10) {
            Err(AppError::NoPrograms { count }) => assert_eq!(1, count),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("expected failure"),
        }
    }
}
