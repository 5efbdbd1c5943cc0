//! Command line interface for the `inout` demo binary.
//!
//! The binary wires a request gateway to an in-process broker with an echo
//! responder and performs a single call.

use clap::Parser;

/// Command line arguments for the `inout` binary.
#[derive(Debug, Parser)]
#[command(name = "inout", version, about = "Send one request and wait for its reply")]
pub struct Cli {
    /// Request body.
    #[arg(short, long, default_value = "Hello World")]
    pub body: String,

    /// Text the demo responder replies with.
    #[arg(long, default_value = "How are you")]
    pub reply: String,

    /// Queue the request is sent to.
    #[arg(long, default_value = "queue.request")]
    pub request_queue: String,

    /// Queue replies are routed to.
    #[arg(long, default_value = "queue.response", conflicts_with = "temporary")]
    pub reply_queue: String,

    /// Use a temporary reply destination instead of the reply queue.
    #[arg(long)]
    pub temporary: bool,

    /// Request timeout in milliseconds.
    #[arg(short, long, default_value_t = 5_000)]
    pub timeout_ms: u64,

    /// Correlation id to send instead of a generated one.
    #[arg(short, long)]
    pub correlation_id: Option<String>,

    /// Keep the responder silent so the call times out.
    #[arg(long)]
    pub silent: bool,

    /// Address to serve Prometheus metrics on.
    #[arg(long)]
    pub metrics_addr: Option<std::net::SocketAddr>,
}
