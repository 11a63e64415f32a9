//! `compute` — the worker entry point.

use std::net::TcpStream;
use std::process::ExitCode;

use perfnum_config::Settings;
use perfnum_core::shm::ShmRegion;
use perfnum_core::{signal, worker, Method};

fn usage() -> ! {
    eprintln!("usage:");
    eprintln!("  compute p <start> <end>");
    eprintln!("  compute m");
    eprintln!("  compute s <server-ip>");
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
        Method::Pipes => {
            let start = args.get(1).and_then(|s| s.parse::<i64>().ok()).unwrap_or_else(|| usage());
            let end = args.get(2).and_then(|s| s.parse::<i64>().ok()).unwrap_or_else(|| usage());
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            worker::run_pipes(start, end, &settings, &mut out)
        }
        Method::Shmem => match ShmRegion::mount(&settings) {
            Ok(region) => worker::run_shmem(&region, &settings),
            Err(e) => {
                eprintln!("compute: {e}");
                return ExitCode::FAILURE;
            }
        },
        Method::Socket => {
            let ip = args.get(1).cloned().unwrap_or_else(|| usage());
            match TcpStream::connect((ip.as_str(), settings.tcp_port)) {
                Ok(mut stream) => worker::run_socket(&mut stream, &settings),
                Err(e) => {
                    eprintln!("compute: could not connect to {ip}: {e}");
                    return ExitCode::FAILURE;
                }
            }
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("compute: {e}");
            ExitCode::FAILURE
        }
    }
}
