//! `report` — the read-only observer entry point, with an optional `-k`
//! shutdown request.

use std::process::ExitCode;

use perfnum_config::Settings;
use perfnum_core::{reporter, signal, Method};

fn usage() -> ! {
    eprintln!("usage:");
    eprintln!("  report m [-k]");
    eprintln!("  report p [-k]");
    eprintln!("  report s <server-ip> [-k]");
    std::process::exit(2);
}

fn main() -> ExitCode {
    perfnum_telemetry::init_default();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        usage();
    }
    let method = Method::parse(&args[0]).unwrap_or_else(|e| {
        eprintln!("{e}");
        usage();
    });

    let settings = match Settings::from_env() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = signal::install() {
        eprintln!("failed to install signal handlers: {e}");
        return ExitCode::FAILURE;
    }

    let result = match method {
        Method::Shmem => {
            let kill = args.get(1).map(|s| s == "-k").unwrap_or(false);
            if kill {
                reporter::shmem_kill(&settings)
            } else {
                reporter::shmem_display(&settings)
            }
        }
        Method::Pipes => {
            let kill = args.get(1).map(|s| s == "-k").unwrap_or(false);
            if kill {
                reporter::pipes_kill(&settings)
            } else {
                reporter::pipes_display(&settings)
            }
        }
        Method::Socket => {
            let ip = args.get(1).cloned().unwrap_or_else(|| usage());
            let kill = args.get(2).map(|s| s == "-k").unwrap_or(false);
            if kill {
                reporter::socket_kill(&ip, &settings)
            } else {
                reporter::socket_display(&ip, &settings)
            }
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("report: {e}");
            ExitCode::FAILURE
        }
    }
}
