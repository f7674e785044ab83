//! # qi-mesh — Binary Entry Point
//!
//! Dispatches the three subcommands over a `Session`/`ServiceDirectory` pair:
//! run a standalone directory, host a demo echo service, or make a one-shot
//! call through a directory. Logging runs a dual-sink setup: a detailed
//! rolling-file layer plus a colorized stdout layer gated by `-v`.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{filter::LevelFilter, prelude::*, Layer};

use qi_mesh::cli::{Args, Command};
use qi_mesh::logging::ColorizedFormatter;
use qi_mesh::session::ServiceObject;
use qi_mesh::{Buffer, NetworkReactor, Session};

struct EchoService;

#[async_trait::async_trait]
impl ServiceObject for EchoService {
    async fn invoke(&self, _function: u32, args: &[u8]) -> qi_mesh::Result<Buffer> {
        Ok(Buffer::from_vec(args.to_vec()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let file_appender = tracing_appender::rolling::daily(".", "qi-mesh.log");
    let (non_blocking_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    let detailed_log_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_writer)
        .with_ansi(false)
        .with_filter(log_level);

    let stdout_log = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .event_format(ColorizedFormatter)
        .with_filter(log_level);

    tracing_subscriber::registry()
        .with(detailed_log_layer)
        .with(stdout_log)
        .init();

    match args.command {
        Command::Directory { listen } => run_directory(Args::resolve_listen_url(&listen)).await,
        Command::DemoEcho { directory, listen, name } => {
            run_demo_echo(directory, Args::resolve_listen_url(&listen), name).await
        }
        Command::Call { directory, service, payload } => run_call(directory, service, payload).await,
    }
}

async fn run_directory(listen: String) -> Result<()> {
    info!(listen, "starting service directory");
    let reactor = Arc::new(NetworkReactor::start()?);
    let url = qi_mesh::Url::parse(&listen)?;
    let directory = qi_mesh::ServiceDirectory::listen(reactor, &url).await?;
    info!(endpoints = ?directory.endpoints(), "directory listening");
    std::future::pending::<()>().await;
    Ok(())
}

async fn run_demo_echo(directory_url: String, listen: String, name: String) -> Result<()> {
    info!(directory_url, listen, name, "starting demo echo service");
    let reactor = Arc::new(NetworkReactor::start()?);
    let session = Session::new(reactor);
    session.connect(&directory_url).await?;
    session.listen(&listen).await?;
    let id = session.register_service(&name, Arc::new(EchoService)).await?;
    info!(service_id = id, "echo service registered");
    std::future::pending::<()>().await;
    Ok(())
}

async fn run_call(directory_url: String, service: String, payload: String) -> Result<()> {
    let reactor = Arc::new(NetworkReactor::start()?);
    let session = Session::new(reactor);
    session.connect(&directory_url).await?;
    let proxy = session.service(&service).await?;

    let mut args = Buffer::new();
    qi_mesh::codec::Writer::new(&mut args).write_string(&payload);
    let reply = match proxy.call(0, args).await {
        Ok(reply) => reply,
        Err(err) => {
            error!(error = %err, "call failed");
            return Err(err.into());
        }
    };

    let mut reader = qi_mesh::codec::Reader::new(reply.body.as_slice());
    let text = reader.read_string().unwrap_or_else(|_| String::from("<unreadable reply>"));
    println!("{text}");
    session.close().await;
    Ok(())
}
