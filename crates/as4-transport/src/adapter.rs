use std::collections::VecDeque;

use thiserror::Error;
use tracing::debug;

use as4_core::cancel::{CancelToken, Cancelled};

/// One outgoing wire exchange: serialized message bytes plus the content
/// type describing their framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    /// Receiver endpoint address.
    pub endpoint: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// What came back on the same exchange. An empty body with no content type
/// is the valid empty response of asynchronous reply patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportResponse {
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Byte-oriented exchange contract between the gateway and its wire
/// protocol. Implementations own connection handling, TLS and timeouts.
pub trait TransportAdapter {
    /// Transport-specific exchange error.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Performs one request/response exchange with the peer.
    fn submit(
        &mut self,
        request: &TransportRequest,
        token: &CancelToken,
    ) -> Result<TransportResponse, Self::Error>;

    /// Alias of the client certificate presented to the peer, when the
    /// transport authenticates with one.
    fn client_certificate(&self) -> Option<&str> {
        None
    }
}

/// Errors raised by the in-memory adapter.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InMemoryTransportError {
    /// Adapter was configured to fail, or ran out of scripted responses.
    #[error("peer unreachable")]
    Unreachable,
    /// Exchange observed a cancelled token.
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Scriptable adapter for tests: captures every request and replays queued
/// responses in order. An exhausted queue answers with the empty response.
#[derive(Debug, Default)]
pub struct InMemoryAdapter {
    requests: Vec<TransportRequest>,
    responses: VecDeque<TransportResponse>,
    unreachable: bool,
    client_certificate: Option<String>,
}

impl InMemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client_certificate(mut self, alias: impl Into<String>) -> Self {
        self.client_certificate = Some(alias.into());
        self
    }

    /// Queues the response for the next exchange.
    pub fn enqueue_response(&mut self, response: TransportResponse) {
        self.responses.push_back(response);
    }

    /// Makes every subsequent exchange fail.
    pub fn set_unreachable(&mut self, unreachable: bool) {
        self.unreachable = unreachable;
    }

    /// Drains the captured requests.
    pub fn take_requests(&mut self) -> Vec<TransportRequest> {
        std::mem::take(&mut self.requests)
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }
}

impl TransportAdapter for InMemoryAdapter {
    type Error = InMemoryTransportError;

    fn submit(
        &mut self,
        request: &TransportRequest,
        token: &CancelToken,
    ) -> Result<TransportResponse, Self::Error> {
        token.check()?;
        if self.unreachable {
            return Err(InMemoryTransportError::Unreachable);
        }
        debug!(endpoint = %request.endpoint, bytes = request.body.len(), "in-memory exchange");
        self.requests.push(request.clone());
        Ok(self
            .responses
            .pop_front()
            .unwrap_or_else(TransportResponse::empty))
    }

    fn client_certificate(&self) -> Option<&str> {
        self.client_certificate.as_deref()
    }
}
