//! `manage` — the coordinator entry point.

use std::process::ExitCode;

use perfnum_config::Settings;
use perfnum_core::{coordinator, signal, Method};

fn usage() -> ! {
    eprintln!("usage:");
    eprintln!("  manage p <limit> <nprocs>");
    eprintln!("  manage m <limit>");
    eprintln!("  manage s <limit>");
    std::process::exit(2);
}

fn parse_i64(args: &[String], idx: usize) -> i64 {
    args.get(idx).and_then(|s| s.parse().ok()).unwrap_or_else(|| usage())
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
        Method::Pipes => {
            let limit = parse_i64(&args, 1);
            let nprocs = args.get(2).and_then(|s| s.parse::<usize>().ok()).unwrap_or_else(|| usage());
            coordinator::pipes::run(limit, nprocs, &settings)
        }
        Method::Shmem => coordinator::shmem::run(parse_i64(&args, 1), &settings),
        Method::Socket => coordinator::socket::run(parse_i64(&args, 1), &settings),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("manage: {e}");
            ExitCode::FAILURE
        }
    }
}
