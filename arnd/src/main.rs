/*
 * This file is a part of Arn
 */

//! # arnd
//!
//! `arnd` is the server for the Active Registry Network: a distributed,
//! hierarchical, shared data tree with synchronization, persistence and
//! access control. See the module documentation for each subsystem.

use env_logger::Builder;
use libarn::util::terminal;
use libarn::{URL, VERSION};
use std::env;
use std::fs;
use std::process;
use tokio::signal;

mod auth;
mod config;
mod ctx;
mod depend;
mod discovery;
mod error;
mod handle;
mod net;
mod persist;
#[cfg(test)]
mod tests;
mod tree;
#[macro_use]
mod util;

use config::Config;
use ctx::Context;
use error::ArnResult;
use net::xstring::XStringMap;
use net::Listener;
use std::sync::Arc;
use tree::Path;

const PID_FILE: &str = ".arn_pid";

static BANNER: &str = "\n █████  ██████  ███    ██\n██   ██ ██   ██ ████   ██\n███████ ██████  ██ ██  ██\n██   ██ ██   ██ ██  ██ ██\n██   ██ ██   ██ ██   ████\n                          \n";

fn main() {
    Builder::new()
        .parse_filters(&env::var("ARN_LOG").unwrap_or_else(|_| "info".to_owned()))
        .init();

    let pid_guard = match acquire_pid_file() {
        Ok(guard) => guard,
        Err(e) => {
            log::error!("{e}");
            process::exit(0x100);
        }
    };

    let config = match Config::load(Some(std::path::Path::new("arn.yaml")), env::args().skip(1)) {
        Ok(cfg) => cfg,
        Err(e) => {
            log::error!("bad configuration: {e}");
            process::exit(0x100);
        }
    };

    println!("Arn v{VERSION} | {URL}\n{BANNER}");
    log::info!("binding listener to {}", config.bind_addr);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("arnd")
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    let result = runtime.block_on(run_server(config));

    drop(runtime);
    drop(pid_guard);

    if let Err(e) = fs::remove_file(PID_FILE) {
        log::error!("shutdown failure: failed to remove pid file: {e}");
        process::exit(0x100);
    }

    if let Err(e) = result {
        log::error!("server exited with error: {e}");
        process::exit(0x100);
    }
    terminal::write_info("Goodbye :)\n").ok();
}

async fn run_server(config: Config) -> ArnResult<()> {
    let ctx = Context::new();
    if let Some(dir) = &config.persist_dir {
        let backend = Arc::new(persist::DirPersist::open(dir)?);
        ctx.with_persist_mount(Path::root());
        ctx.with_persist_backend(backend)?;
        log::info!("persistence backend mounted at {dir}");
    }
    let access = Arc::new(auth::Access::new(config.demand_login));
    let mut who_i_am = XStringMap::default();
    who_i_am.push("protovers", &format!("{}.{}", net::protocol::handshake::PROTOCOL_MAJOR, net::protocol::handshake::PROTOCOL_MINOR));
    who_i_am.push("server", "1");
    let listener = Listener::new(ctx, access, who_i_am, config.max_connections, config.encrypt_policy);

    tokio::select! {
        result = listener.serve(config.bind_addr) => result,
        _ = signal::ctrl_c() => {
            log::info!("received ctrl-c, shutting down");
            Ok(())
        }
    }
}

/// Holds the pid file open for the process lifetime; on an already-running
/// instance this returns an error instead of silently taking over the data
/// directory (mirrors the teacher's `.sky_pid` check in `main.rs`).
struct PidGuard;

fn acquire_pid_file() -> ArnResult<PidGuard> {
    if std::path::Path::new(PID_FILE).exists() {
        return Err(error::ArnError::new(
            error::ErrorKind::Config,
            error::Subsystem::Config,
            format!("{PID_FILE} exists; is another arnd instance already running in this directory?"),
        ));
    }
    fs::write(PID_FILE, process::id().to_string())?;
    Ok(PidGuard)
}
