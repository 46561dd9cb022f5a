//! Transport adapters: shuttle JSON-RPC frames to and from one server.
//!
//! `open` returns the inbound side as a channel; the channel closing is
//! the transport closing. Outbound frames go through `send`, which is
//! safe to call concurrently.

pub mod http;
pub mod sse;
pub mod stdio;

pub use http::HttpTransport;
pub use stdio::StdioTransport;

use crate::jsonrpc::Frame;
use async_trait::async_trait;
use rago_config::{ServerDescriptor, TransportConfig, TransportSpec};
use rago_core::EventBus;
use rago_core::error::TransportError;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Inbound frame channel capacity.
pub(crate) const INBOUND_BUFFER: usize = 64;

#[async_trait]
pub trait Transport: Send + Sync {
    /// "stdio" or "http".
    fn kind(&self) -> &'static str;

    /// Connect (spawn the child / prepare the HTTP session) and hand back
    /// the stream of inbound frames.
    async fn open(&self) -> Result<mpsc::Receiver<Frame>, TransportError>;

    async fn send(&self, frame: Frame) -> Result<(), TransportError>;

    /// Tear down. Idempotent; the inbound channel ends afterwards.
    async fn close(&self);
}

/// Builds the transport for a descriptor. The manager calls this on every
/// (re)start so each attempt gets a fresh child or HTTP session.
pub trait TransportFactory: Send + Sync {
    fn create(&self, descriptor: &ServerDescriptor) -> Result<Arc<dyn Transport>, TransportError>;
}

/// The factory used outside tests: stdio or HTTP per the descriptor.
pub struct DefaultTransportFactory {
    config: TransportConfig,
    events: Option<Arc<EventBus>>,
}

impl DefaultTransportFactory {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, descriptor: &ServerDescriptor) -> Result<Arc<dyn Transport>, TransportError> {
        match &descriptor.transport {
            TransportSpec::Stdio { .. } => {
                let mut transport = StdioTransport::new(descriptor.clone())?;
                if let Some(events) = &self.events {
                    transport = transport.with_events(Arc::clone(events));
                }
                Ok(Arc::new(transport))
            }
            TransportSpec::Http { .. } => Ok(Arc::new(HttpTransport::new(
                descriptor.clone(),
                &self.config,
            )?)),
        }
    }
}
