use anyhow::Result;
use std::future::Future;

/// Resolves Tion peripherals known to the local adapter
pub trait TionTransportManager: Send + Sync + 'static {
    type Transport: TionTransport;

    /// Look up the peripheral with the given address, `None` if the adapter does not know it
    fn find(&self, address: &str) -> impl Future<Output = Result<Option<Self::Transport>>> + Send;
}

/// Tion transport interface
pub trait TionTransport: Send + Sync + 'static {
    /// Whether the peripheral is bonded with the adapter
    fn is_paired(&self) -> impl Future<Output = Result<bool>> + Send;
    fn is_connected(&self) -> impl Future<Output = Result<bool>> + Send;
    /// Establish the link and discover services
    fn connect(&self) -> impl Future<Output = Result<()>> + Send;
    fn disconnect(&self) -> impl Future<Output = Result<()>> + Send;
    /// Write with response
    fn write(&self, char: uuid::Uuid, bytes: &[u8]) -> impl Future<Output = Result<()>> + Send;
    fn read(&self, char: uuid::Uuid) -> impl Future<Output = Result<Vec<u8>>> + Send;
}
