//! Demo binary for `inout`.
//!
//! Starts an in-process broker with a responder on the request queue, sends
//! one request through a gateway and prints the reply.

mod cli;

use std::{error::Error, sync::Arc, time::Duration};

use clap::Parser;
use futures::FutureExt;
use inout::{
    CallOptions,
    Correlatable,
    Destination,
    InMemoryBroker,
    Message,
    MessageHandler,
    RequestGateway,
    Subscription,
    Transport,
};

async fn start_responder(
    broker: &InMemoryBroker,
    queue: &Destination,
    reply: Arc<str>,
) -> Result<Subscription, inout::TransportError> {
    let responder = broker.clone();
    let handler: MessageHandler = Arc::new(move |request: Message| {
        let broker = responder.clone();
        let reply = Arc::clone(&reply);
        async move {
            let Some(reply_to) = request.reply_to() else {
                log::warn!("request without reply-to dropped");
                return;
            };
            let mut message = Message::new(reply.as_bytes().to_vec());
            message.set_correlation_id(request.correlation_id().ok().flatten().as_ref());
            if let Err(err) = broker.send(message, &reply_to).await {
                log::warn!("failed to send reply: {err}");
            }
        }
        .boxed()
    });
    broker.subscribe(queue, handler).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Enable structured logging for the demo.
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();

    #[cfg(feature = "metrics")]
    if let Some(addr) = cli.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
    }
    #[cfg(not(feature = "metrics"))]
    if cli.metrics_addr.is_some() {
        log::warn!("built without the metrics feature; --metrics-addr ignored");
    }

    let broker = InMemoryBroker::new();
    let request_queue = Destination::new(&cli.request_queue);
    let _responder = if cli.silent {
        None
    } else {
        Some(start_responder(&broker, &request_queue, Arc::from(cli.reply.as_str())).await?)
    };

    let builder = RequestGateway::builder(broker.clone())
        .timeout(Duration::from_millis(cli.timeout_ms))
        .caller_supplied_ids();
    let builder = if cli.temporary {
        builder.temporary_replies()
    } else {
        builder.reply_to(Destination::new(&cli.reply_queue))
    };
    let gateway = builder.start().await?;

    let mut options = CallOptions::new();
    if let Some(id) = cli.correlation_id {
        options = options.correlation_id(id);
    }
    let result = gateway.call(cli.body, &request_queue, options).await;
    gateway.shutdown().await;
    broker.close().await;

    let reply = result?;
    println!(
        "{} (correlation id {})",
        String::from_utf8_lossy(reply.payload()),
        reply.correlation_id()
    );
    Ok(())
}
