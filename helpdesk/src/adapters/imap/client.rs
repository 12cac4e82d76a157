use async_trait::async_trait;

use crate::error::HelpdeskError;
use crate::types::InboundSettings;

/// One message as downloaded from the server.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub uid: u32,
    /// Full RFC 5322 source
    pub body: Vec<u8>,
}

#[async_trait]
pub trait InboundClient: Send + Sync {
    /// Connect and authenticate.
    async fn connect(
        &self,
        settings: &InboundSettings,
    ) -> Result<Box<dyn InboundSession>, HelpdeskError>;
}

#[async_trait]
pub trait InboundSession: Send {
    /// Select a folder. Fails with `NotFound` if the server has no such folder.
    async fn select(&mut self, folder: &str) -> Result<(), HelpdeskError>;

    /// Unseen messages of the selected folder, without setting `\Seen`.
    async fn fetch_unseen(&mut self) -> Result<Vec<RawMessage>, HelpdeskError>;

    async fn mark_seen(&mut self, uid: u32) -> Result<(), HelpdeskError>;

    async fn logout(&mut self) -> Result<(), HelpdeskError>;
}
