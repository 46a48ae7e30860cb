//! Main event loop: pulls events from the transport and hands each one to
//! the control panel or the router, one at a time.

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;

use crate::channels::transport::{EventStream, Transport};
use crate::control::ControlPanel;
use crate::error::Error;
use crate::pipeline::{IncomingEvent, RouteReport, Router};

/// Wires a transport to the router and the control panel.
pub struct Relay {
    transport: Arc<dyn Transport>,
    router: Arc<Router>,
    control: Arc<ControlPanel>,
}

impl Relay {
    pub fn new(
        transport: Arc<dyn Transport>,
        router: Arc<Router>,
        control: Arc<ControlPanel>,
    ) -> Self {
        Self {
            transport,
            router,
            control,
        }
    }

    /// Start the transport and process events until Ctrl+C or the stream
    /// ends.
    pub async fn run(self) -> Result<(), Error> {
        let stream = self.transport.start().await?;
        tracing::info!(transport = self.transport.name(), "Relay ready and listening");

        self.process(stream, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for Ctrl+C: {e}");
                std::future::pending::<()>().await;
            }
            tracing::info!("Ctrl+C received, shutting down...");
        })
        .await;
        Ok(())
    }

    /// Drain `stream`, awaiting each event fully before the next.
    pub async fn process<F>(&self, mut stream: EventStream, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let event = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                next = stream.next() => match next {
                    Some(event) => event,
                    None => {
                        tracing::info!("Transport stream ended, shutting down...");
                        break;
                    }
                },
            };

            self.handle_event(&event).await;
        }
    }

    /// Process one event. `None` when it went to the control panel.
    pub async fn handle_event(&self, event: &IncomingEvent) -> Option<RouteReport> {
        if event.chat_id == self.control.control_chat_id() {
            self.control.handle(event).await;
            return None;
        }

        let report = self.router.handle(event).await;
        tracing::debug!(
            chat_id = report.chat_id,
            message_id = report.message_id,
            disposition = ?report.disposition,
            claimed = report.claimed_count(),
            "Message handled"
        );
        Some(report)
    }
}
