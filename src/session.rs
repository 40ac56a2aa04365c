use crate::error::{Error, Result};
use crate::executor::{CallExecutor, Outcome};
use crate::protocol::{self, Status, tion_uuids};
use crate::transport::{TionTransport, TionTransportManager};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Wait after connecting, before the characteristic table is usable
pub const CONNECT_SETTLE: Duration = Duration::from_secs(1);
/// Wait between the status request and reading the response
pub const RESPONSE_SETTLE: Duration = Duration::from_millis(200);

const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// The single link to one breezer.
///
/// Every hardware operation runs through the [`CallExecutor`] and holds the link
/// lock for its whole duration, so at most one exchange is on the air, including
/// operations whose caller already timed out.
pub struct Session<M: TionTransportManager> {
    address: String,
    manager: Arc<M>,
    link: Arc<Mutex<Option<M::Transport>>>,
    state: Arc<watch::Sender<LinkState>>,
    executor: CallExecutor,
}

impl<M: TionTransportManager> Session<M> {
    pub fn new(manager: M, address: impl Into<String>) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Session {
            address: address.into(),
            manager: Arc::new(manager),
            link: Arc::new(Mutex::new(None)),
            state: Arc::new(state),
            executor: CallExecutor::new(),
        }
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    pub fn executor(&self) -> &CallExecutor {
        &self.executor
    }

    /// Whether the link is up. Does not wait behind an operation in flight.
    pub async fn connected(&self) -> bool {
        let Ok(link) = self.link.try_lock() else {
            return self.state() == LinkState::Connected;
        };
        match link.as_ref() {
            Some(transport) => matches!(timeout(PROBE_TIMEOUT, transport.is_connected()).await, Ok(Ok(true))),
            None => false,
        }
    }

    /// Resolve, verify pairing and connect. No-op when already connected.
    pub async fn connect(&self, deadline: Duration) -> Result<()> {
        let manager = Arc::clone(&self.manager);
        let link = Arc::clone(&self.link);
        let state = Arc::clone(&self.state);
        let address = self.address.clone();
        self.executor
            .execute(deadline, move |outcome| async move {
                let mut link = link.lock().await;
                if !started(&outcome, "connect") {
                    return;
                }
                if let Some(transport) = link.as_ref() {
                    match transport.is_connected().await {
                        Ok(true) => {
                            debug!("already connected to {}", address);
                            return outcome.succeed(());
                        }
                        Ok(false) => debug!("stale handle for {}, reconnecting", address),
                        Err(e) => warn!("failed to probe stale handle for {}: {:#}", address, e),
                    }
                    *link = None;
                }

                state.send_replace(LinkState::Connecting);
                match establish(manager.as_ref(), &address).await {
                    Ok(transport) => {
                        *link = Some(transport);
                        state.send_replace(LinkState::Connected);
                        info!("connected to {}", address);
                        outcome.succeed(())
                    }
                    Err(e) => {
                        state.send_replace(LinkState::Disconnected);
                        outcome.fail(e)
                    }
                }
            })
            .await
    }

    /// Tear the link down. The handle is released even if teardown fails or the
    /// caller stopped waiting.
    pub async fn disconnect(&self, deadline: Duration) -> Result<()> {
        let link = Arc::clone(&self.link);
        let state = Arc::clone(&self.state);
        let address = self.address.clone();
        self.executor
            .execute(deadline, move |outcome| async move {
                let mut link = link.lock().await;
                let Some(transport) = link.take() else {
                    return outcome.succeed(());
                };
                state.send_replace(LinkState::Disconnecting);
                let res = match transport.is_connected().await {
                    Ok(true) => transport.disconnect().await,
                    Ok(false) => Ok(()),
                    Err(e) => Err(e),
                };
                state.send_replace(LinkState::Disconnected);
                info!("disconnected from {}", address);
                outcome.complete(res.map_err(Error::from))
            })
            .await
    }

    /// Request and decode the current status
    pub async fn read_state(&self, deadline: Duration) -> Result<Status> {
        let link = Arc::clone(&self.link);
        let state = Arc::clone(&self.state);
        self.executor
            .execute(deadline, move |outcome| async move {
                let mut link = link.lock().await;
                if !started(&outcome, "read") {
                    return;
                }
                let res = match live_link(&mut link, &state).await {
                    Ok(transport) => request_status(transport).await,
                    Err(e) => Err(e),
                };
                if let Err(Error::Transport(_)) = &res {
                    drop_if_lost(&mut link, &state).await;
                }
                outcome.complete(res)
            })
            .await
    }

    /// Write the settings of `status` to the device.
    ///
    /// The device does not acknowledge writes; only a later read shows whether it applied them.
    pub async fn update_state(&self, status: &Status, deadline: Duration) -> Result<()> {
        let link = Arc::clone(&self.link);
        let state = Arc::clone(&self.state);
        let frame = status.encode_update();
        self.executor
            .execute(deadline, move |outcome| async move {
                let mut link = link.lock().await;
                if !started(&outcome, "update") {
                    return;
                }
                let res = match live_link(&mut link, &state).await {
                    Ok(transport) => {
                        debug!("CMD: {:x?}", frame);
                        transport.write(tion_uuids::WRITE, &frame).await.map_err(Error::from)
                    }
                    Err(e) => Err(e),
                };
                if let Err(Error::Transport(_)) = &res {
                    drop_if_lost(&mut link, &state).await;
                }
                outcome.complete(res)
            })
            .await
    }
}

fn started<T>(outcome: &Outcome<T>, op: &str) -> bool {
    if outcome.is_abandoned() {
        debug!("{} abandoned before it reached the device", op);
        return false;
    }
    true
}

async fn establish<M: TionTransportManager>(manager: &M, address: &str) -> Result<M::Transport> {
    let Some(transport) = manager.find(address).await? else {
        return Err(Error::DeviceNotFound(address.to_string()));
    };
    if !transport.is_paired().await? {
        return Err(Error::NotPaired(address.to_string()));
    }
    transport.connect().await?;
    sleep(CONNECT_SETTLE).await;
    Ok(transport)
}

async fn live_link<'a, T: TionTransport>(
    link: &'a mut Option<T>,
    state: &watch::Sender<LinkState>,
) -> Result<&'a T> {
    let connected = match link.as_ref() {
        Some(transport) => transport.is_connected().await?,
        None => false,
    };
    if !connected {
        if link.take().is_some() {
            warn!("link went down, dropping handle");
            state.send_replace(LinkState::Disconnected);
        }
        return Err(Error::NotConnected);
    }
    link.as_ref().ok_or(Error::NotConnected)
}

async fn drop_if_lost<T: TionTransport>(link: &mut Option<T>, state: &watch::Sender<LinkState>) {
    let lost = match link.as_ref() {
        Some(transport) => !matches!(transport.is_connected().await, Ok(true)),
        None => false,
    };
    if lost {
        warn!("link lost after transport error, dropping handle");
        *link = None;
        state.send_replace(LinkState::Disconnected);
    }
}

async fn request_status<T: TionTransport>(transport: &T) -> Result<Status> {
    let request = protocol::status_request();
    transport.write(tion_uuids::WRITE, &request).await?;
    sleep(RESPONSE_SETTLE).await;
    let data = transport.read(tion_uuids::READ).await?;
    debug!("RSP: {:x?}", data);
    Status::decode(&data)
}
