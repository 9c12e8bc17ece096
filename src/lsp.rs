pub mod error;
pub mod message_parser;
pub mod process;
pub mod stdio_transport;
pub mod transport;
pub mod types;

use crate::lsp::error::{LspError, Result};
use crate::lsp::transport::LspTransport;
use crate::lsp::types::{Message, Notification, Request, Response};
use std::time::Duration;
use tracing::{debug, warn};

/// One-request-at-a-time JSON-RPC client.
///
/// There is no pending-request table: each `request` sends, then reads until
/// the matching response arrives. Concurrent callers would need a map keyed by
/// id plus a background reader, layered on top of the same transport.
pub struct LspClient<T> {
    transport: T,
}

impl<T: LspTransport> LspClient<T> {
    pub fn new(transport: T) -> Self {
        LspClient { transport }
    }

    /// Send `request` and wait for its response.
    ///
    /// `deadline` bounds the whole exchange; `None` waits forever.
    pub async fn request(
        &mut self,
        request: Request,
        deadline: Option<Duration>,
    ) -> Result<Response> {
        match deadline {
            Some(dur) => tokio::time::timeout(dur, self.exchange(request))
                .await
                .map_err(|_| LspError::Timeout(dur))?,
            None => self.exchange(request).await,
        }
    }

    pub async fn notify(&mut self, method: &str, params: serde_json::Value) -> Result<()> {
        let notification = Notification::new(method, params);
        debug!(method, "sending notification");
        self.transport.send(&notification.into()).await
    }

    async fn exchange(&mut self, request: Request) -> Result<Response> {
        debug!(id = %request.id, method = %request.method, "sending request");
        let expected = request.id.clone();
        self.transport.send(&Message::Request(request)).await?;

        loop {
            match self.transport.receive().await? {
                Message::Response(response) => {
                    if response.id.as_ref() != Some(&expected) {
                        return Err(LspError::IdMismatch {
                            expected,
                            actual: response.id,
                        });
                    }
                    return Ok(response);
                }
                Message::Notification(notification) => {
                    debug!(
                        method = %notification.method,
                        "skipping notification while waiting for id={}", expected
                    );
                }
                Message::Request(server_request) => {
                    warn!(
                        id = %server_request.id,
                        method = %server_request.method,
                        "ignoring server request while waiting for id={}", expected
                    );
                }
            }
        }
    }
}
