use crate::error::Result;
use crate::message::{PartialUpdate, StateReport};
use crate::session::Session;
use crate::transport::TionTransportManager;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Receives the new state after a successful change
pub trait StateNotifier: Send + Sync + 'static {
    fn state_changed(&self, report: &StateReport) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Who owns the link between requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPolicy {
    /// Leave the link open between requests
    KeepAlive,
    /// Connect before and disconnect after every request
    PerRequest,
}

/// Turns control messages into device exchanges, one request at a time
pub struct CommandHandler<M: TionTransportManager, N: StateNotifier> {
    session: Arc<Session<M>>,
    notifier: N,
    policy: ConnectionPolicy,
    timeout: Duration,
    serial: Mutex<()>,
}

impl<M: TionTransportManager, N: StateNotifier> CommandHandler<M, N> {
    pub fn new(session: Arc<Session<M>>, notifier: N, policy: ConnectionPolicy, timeout: Duration) -> Self {
        CommandHandler {
            session,
            notifier,
            policy,
            timeout,
            serial: Mutex::new(()),
        }
    }

    pub fn session(&self) -> &Session<M> {
        &self.session
    }

    /// Read the device and project its state for publishing
    pub async fn handle_read(&self) -> Result<StateReport> {
        let _serial = self.serial.lock().await;
        self.open().await?;
        let res = self.session.read_state(self.timeout).await;
        self.close().await;
        let status = res?;
        debug!(?status, "current state");
        Ok(status.to_report())
    }

    /// Apply `request` on top of the freshly read state.
    ///
    /// Returns whether anything was written. A request that matches the current
    /// state causes no write and no notification.
    pub async fn handle_update(&self, request: PartialUpdate) -> Result<bool> {
        request.validate()?;
        if request.is_empty() {
            debug!("empty control request, ignoring");
            return Ok(false);
        }
        let _serial = self.serial.lock().await;
        self.open().await?;
        let res = self.apply(&request).await;
        self.close().await;
        res
    }

    async fn apply(&self, request: &PartialUpdate) -> Result<bool> {
        let current = self.session.read_state(self.timeout).await?;

        if let Some(on) = request.on
            && on == current.on
        {
            info!("Already {}", if on { "on" } else { "off" });
        }

        let (updated, changed) = current.apply_partial(request);
        if !changed {
            info!("Device already in requested state, nothing to write");
            return Ok(false);
        }

        self.session.update_state(&updated, self.timeout).await?;
        info!("Made update by control request");
        if let Err(e) = self.notifier.state_changed(&updated.to_report()).await {
            warn!("Failed to publish new state: {:#}", e);
        }
        Ok(true)
    }

    async fn open(&self) -> Result<()> {
        if self.policy == ConnectionPolicy::KeepAlive && self.session.connected().await {
            return Ok(());
        }
        self.session.connect(self.timeout).await
    }

    async fn close(&self) {
        if self.policy == ConnectionPolicy::KeepAlive {
            return;
        }
        if let Err(e) = self.session.disconnect(self.timeout).await {
            warn!("Failed to disconnect: {}", e);
        }
    }
}
