//! Command-line entry point: parse argv, open the link, run one transfer.
//!
//! Grounded on `src/bin/shell.rs`'s `env_logger::init()` + `main() ->
//! io::Result<()>` shape, generalized to the exit-code mapping `spec.md` §6
//! and [`rawtftp::error::ExitCode`] require instead of always exiting 0/1.

use std::process::ExitCode as ProcessExitCode;

use log::error;

use rawtftp::config::Config;
use rawtftp::error::ExitCode;
use rawtftp::pool::Pool;
use rawtftp::session::Session;
use rawtftp::Error;

fn run() -> Result<ExitCode, Error> {
    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "tftpclient".to_string());
    let args: Vec<String> = args.collect();

    let config = Config::from_args(&program, &args)?;

    // spec.md §6: verbose/quiet select the log level filter. RUST_LOG, if
    // set, still wins over both, matching env_logger's usual precedence.
    let default_filter = if config.verbose {
        "debug"
    } else if config.quiet {
        "error"
    } else {
        "warn"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    // A pre-existing destination without --overwrite is not a setup error:
    // spec.md §6 reserves a distinct exit code (`Warning`) for it.
    if !config.overwrite {
        if let rawtftp::config::Direction::Download = config.transfer.direction {
            if config.transfer.local_path.exists() {
                eprintln!(
                    "tftpclient: {} already exists; pass --overwrite to replace it",
                    config.transfer.local_path.display()
                );
                return Ok(ExitCode::Warning);
            }
        }
    }

    let pool = Pool::open(&config.device, config.unit)?;
    #[cfg(feature = "fault-injection")]
    let pool = pool.with_fault_injection(rawtftp::pool::FaultInjection::from_env());
    let session = Session::new(pool, config.local_addr, config.transfer, config.remote_port)?;
    let stats = session.run()?;

    if !config.quiet {
        println!("transferred {} bytes", stats.bytes_transferred);
    }
    Ok(ExitCode::Success)
}

fn main() -> ProcessExitCode {
    match run() {
        Ok(code) => ProcessExitCode::from(code as u8),
        Err(err) => {
            error!("{err}");
            eprintln!("tftpclient: {err}");
            ProcessExitCode::from(err.exit_code() as u8)
        }
    }
}
