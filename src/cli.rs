//! # Command-Line Interface
//!
//! Argument parsing for the `qi-mesh` binary: running a standalone directory
//! node, a demo echo service, and a one-shot client call, for manual
//! smoke-testing and as the driver behind the black-box integration tests.

use clap::builder::styling::{AnsiColor, Styles};
use clap::{Parser, Subcommand};

use crate::defaults::DEFAULT_LISTEN_URL;

fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// qi-mesh — a lightweight RPC/messaging runtime connecting processes into a
/// service mesh.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct Args {
    /// Increase log verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run a standalone service directory until killed.
    Directory {
        /// URL to listen on. Falls back to `QI_LISTEN_URL`, then a built-in default.
        #[arg(long)]
        listen: Option<String>,
    },
    /// Register a demo "echo" service with a directory and serve forever.
    DemoEcho {
        /// Directory URL to register with.
        #[arg(long)]
        directory: String,
        /// URL this service listens on for incoming calls.
        #[arg(long)]
        listen: Option<String>,
        /// Name to register the service under.
        #[arg(long, default_value = "echo")]
        name: String,
    },
    /// Resolve a service through a directory and call it once, printing the reply.
    Call {
        /// Directory URL to resolve the service through.
        #[arg(long)]
        directory: String,
        /// Service name to resolve and call.
        #[arg(long)]
        service: String,
        /// Payload string sent as the call's single string argument.
        #[arg(long)]
        payload: String,
    },
}

impl Args {
    /// Resolve a `--listen` flag against `QI_LISTEN_URL` and the built-in default.
    pub fn resolve_listen_url(explicit: &Option<String>) -> String {
        explicit
            .clone()
            .or_else(|| std::env::var("QI_LISTEN_URL").ok())
            .unwrap_or_else(|| DEFAULT_LISTEN_URL.to_string())
    }
}
