use std::process;
use clap::Parser;
use log::{error, info};
use rust_sscha::{RunHooks, RunInput};

#[derive(Parser, Debug)]
#[command(version, about = "SSCHA free-energy minimization", long_about = None)]
struct Args {
    /// YAML run file
    #[arg(short, long, default_value = "sscha.yml")]
    config: String,

    /// 0: results only, 1: every step, 2: frequencies and final structure too
    #[arg(short, long, default_value_t = 1)]
    verbose: u8,

    /// Write the minimization history table to this file
    #[arg(short, long)]
    save: Option<String>,
}

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .target(env_logger::Target::Stdout)
        .format_timestamp_millis()
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(true) => {}
        Ok(false) => process::exit(2),
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
}

/// Run the minimization, returning whether it converged.
fn run(args: &Args) -> rust_sscha::Result<bool> {
    info!("Reading {}", args.config);
    let mut minimizer = RunInput::from_file(&args.config)?.into_minimizer()?;

    minimizer.init()?;
    if args.verbose >= 1 {
        minimizer.log_settings()?;
    }
    let status = minimizer.run(args.verbose, RunHooks::default())?;
    minimizer.finalize(args.verbose)?;

    if let Some(path) = &args.save {
        minimizer.history().save(path)?;
        info!("Minimization data saved in {}", path);
    }

    if !minimizer.is_converged() {
        info!("Stopped without convergence: {:?}", status);
    }
    Ok(minimizer.is_converged())
}
