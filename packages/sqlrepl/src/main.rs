//! Command-line entry point for the SQL REPL.
//!
//! ```text
//! sqlrepl <dbtype> <connstring>      (Interactive mode)
//! sqlrepl -t <dbtype> -c <connstring> (Interactive mode)
//! sqlrepl [-p <port>]                (Server mode)
//! ```

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

mod cli;
mod interactive;

use std::process::ExitCode;

use clap::{CommandFactory as _, Parser as _};

use crate::cli::{Args, Mode};

/// Overrides the host the server binds to.
const LISTEN_HOST_ENV: &str = "SQLREPL_LISTEN_HOST";
const DEFAULT_LISTEN_HOST: &str = "0.0.0.0";

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = sqlrepl_logging::init() {
        eprintln!("Failed to initialize logging: {e}");
    }

    let args = Args::parse();

    match args.mode() {
        Some(Mode::Interactive {
            dbtype,
            connstring,
        }) => match interactive::run(&dbtype, &connstring).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                log::error!("{e}");
                eprintln!("Error: {e}");
                ExitCode::FAILURE
            }
        },
        Some(Mode::Server { port }) => serve(port).await,
        None => {
            println!("{}", cli::USAGE);
            let _ = Args::command().print_help();
            ExitCode::FAILURE
        }
    }
}

async fn serve(port: u16) -> ExitCode {
    let host = std::env::var(LISTEN_HOST_ENV).unwrap_or_else(|_| DEFAULT_LISTEN_HOST.to_string());

    tokio::select! {
        result = sqlrepl_server::run((host.as_str(), port)) => {
            if let Err(e) = result {
                log::error!("Failed to listen on {host}:{port}: {e}");
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => log::info!("Shutting down"),
                Err(e) => log::error!("Failed to listen for ctrl-c: {e:?}"),
            }
            ExitCode::SUCCESS
        }
    }
}
