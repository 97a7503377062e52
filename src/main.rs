use std::process::ExitCode;

use clap::Parser;
use log::info;

use ossim::app::{self, AppError};
use ossim::cli::Cli;
use ossim::logger;

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = logger::init(logger::level_for(cli.verbose)) {
        eprintln!("logger: {}", e);
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            e.exit_code()
        }
    }
}

fn run(cli: &Cli) -> Result<(), AppError> {
    let config = cli.sim_config()?;
    let (session, report) = app::run(&cli.programs, &config, cli.priority)?;
    println!(
        "CPU execution completed. Total clock cycles: {}",
        report.cycles
    );
    if report.stranded > 0 {
        println!("{} process(es) left waiting on events", report.stranded);
    }
    if let Some(path) = &cli.trace_out {
        app::write_trace(&session.cpu, path)?;
        info!("Trace written to {}", path.display());
    }
    Ok(())
}
