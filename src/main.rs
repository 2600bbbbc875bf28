// src/main.rs

use tokio::sync::broadcast;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use slotkv::config::Config;
use slotkv::server;

struct Args {
    name: Option<String>,
    ip: Option<String>,
    client_port: Option<u16>,
    cluster_port: Option<u16>,
    serve_all_slots: bool,
    config_path: Option<String>,
    log_level: Option<String>,
}

fn parse_args() -> Args {
    let mut args = Args {
        name: None,
        ip: None,
        client_port: None,
        cluster_port: None,
        serve_all_slots: false,
        config_path: None,
        log_level: None,
    };

    let mut raw = std::env::args().skip(1);
    while let Some(flag) = raw.next() {
        match flag.as_str() {
            "--name" => args.name = raw.next(),
            "--ip" => args.ip = raw.next(),
            "--client-port" => args.client_port = raw.next().and_then(|v| v.parse().ok()),
            "--cluster-port" => args.cluster_port = raw.next().and_then(|v| v.parse().ok()),
            "--serve-all-slots" => args.serve_all_slots = true,
            "--config" => args.config_path = raw.next(),
            "--log-level" => args.log_level = raw.next(),
            other => eprintln!("ignoring unrecognized flag {other}"),
        }
    }
    args
}

fn build_config(args: &Args) -> Config {
    let mut config = match &args.config_path {
        Some(path) => Config::from_file(path).unwrap_or_else(|e| {
            eprintln!("failed to load config file {path}: {e}");
            std::process::exit(1);
        }),
        None => Config {
            name: args.name.clone().unwrap_or_else(|| {
                eprintln!("--name or --config is required");
                std::process::exit(1);
            }),
            ip: "127.0.0.1".to_string(),
            client_port: 5000,
            cluster_port: 15000,
            serve_all_slots: false,
            log_level: "info".to_string(),
        },
    };

    if let Some(name) = &args.name {
        config.name = name.clone();
    }
    if let Some(ip) = &args.ip {
        config.ip = ip.clone();
    }
    if let Some(port) = args.client_port {
        config.client_port = port;
    }
    if let Some(port) = args.cluster_port {
        config.cluster_port = port;
    }
    if args.serve_all_slots {
        config.serve_all_slots = true;
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    config
}

#[tokio::main]
async fn main() {
    let args = parse_args();
    let config = build_config(&args);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let node_task = tokio::spawn(server::run(config, shutdown_rx));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received interrupt, shutting down");
            let _ = shutdown_tx.send(());
        }
    }

    match node_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::error!(error = %e, "node exited with an error");
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!(error = %e, "node task panicked");
            std::process::exit(1);
        }
    }
}
