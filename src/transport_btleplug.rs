use crate::transport::{TionTransport, TionTransportManager};

use anyhow::{Context, Result, anyhow};
use btleplug::api::{BDAddr, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Peripheral};
use futures::stream::StreamExt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// How long to scan for a peripheral the adapter has not cached yet
const SCAN_WINDOW: Duration = Duration::from_secs(5);

pub struct TionTransportManagerBtleplug {
    adapter: Adapter,
    #[cfg(target_os = "linux")]
    bluez: bluez_async::BluetoothSession,
}

impl TionTransportManagerBtleplug {
    pub async fn new() -> Result<Self> {
        let manager = btleplug::platform::Manager::new().await?;
        let adapters = manager.adapters().await?;
        let Some(adapter) = adapters.into_iter().next() else {
            return Err(anyhow!("No Bluetooth adapter found"));
        };
        #[cfg(target_os = "linux")]
        let (_, bluez) = bluez_async::BluetoothSession::new()
            .await
            .context("Failed to connect to BlueZ")?;
        Ok(TionTransportManagerBtleplug {
            adapter,
            #[cfg(target_os = "linux")]
            bluez,
        })
    }

    async fn known_peripheral(&self, addr: BDAddr) -> Result<Option<Peripheral>> {
        let peripherals = self.adapter.peripherals().await?;
        Ok(peripherals.into_iter().find(|p| p.address() == addr))
    }

    async fn scan_for(&self, addr: BDAddr) -> Result<Option<Peripheral>> {
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;
        let found = timeout(SCAN_WINDOW, async {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDiscovered(id) = event {
                    let peripheral = self.adapter.peripheral(&id).await?;
                    if peripheral.address() == addr {
                        return anyhow::Ok(Some(peripheral));
                    }
                }
            }
            Err(anyhow!("Scanning stopped unexpectedly"))
        })
        .await
        .unwrap_or(Ok(None));
        self.adapter.stop_scan().await?;
        found
    }

    #[cfg(target_os = "macos")]
    async fn find_by_address(&self, _addr: BDAddr) -> Result<Option<Peripheral>> {
        Err(anyhow!("BLE MAC addresses are not supported on macOS"))
    }

    #[cfg(not(target_os = "macos"))]
    async fn find_by_address(&self, addr: BDAddr) -> Result<Option<Peripheral>> {
        if let Some(peripheral) = self.known_peripheral(addr).await? {
            return Ok(Some(peripheral));
        }
        info!("`{}` not cached by the adapter, scanning...", addr);
        self.scan_for(addr).await
    }
}

impl TionTransportManager for TionTransportManagerBtleplug {
    type Transport = TionTransportBtleplug;

    async fn find(&self, address: &str) -> Result<Option<Self::Transport>> {
        let addr = BDAddr::from_str(address).with_context(|| format!("invalid device address `{}`", address))?;
        let peripheral = self.find_by_address(addr).await?;
        Ok(peripheral.map(|peripheral| TionTransportBtleplug {
            peripheral,
            address: addr,
            #[cfg(target_os = "linux")]
            bluez: self.bluez.clone(),
        }))
    }
}

pub struct TionTransportBtleplug {
    peripheral: Peripheral,
    address: BDAddr,
    #[cfg(target_os = "linux")]
    bluez: bluez_async::BluetoothSession,
}

impl TionTransportBtleplug {
    fn characteristic(&self, uuid: uuid::Uuid) -> Result<Characteristic> {
        for char in self.peripheral.characteristics() {
            if uuid == char.uuid {
                return Ok(char);
            }
        }
        Err(anyhow!("characteristic {} not found", uuid))
    }
}

impl TionTransport for TionTransportBtleplug {
    // btleplug has no notion of bonding, BlueZ keeps it on the device object
    #[cfg(target_os = "linux")]
    async fn is_paired(&self) -> Result<bool> {
        let devices = self.bluez.get_devices().await.context("Failed to list BlueZ devices")?;
        let wanted = self.address.to_string();
        Ok(devices
            .iter()
            .any(|d| d.paired && d.mac_address.to_string().eq_ignore_ascii_case(&wanted)))
    }

    #[cfg(not(target_os = "linux"))]
    async fn is_paired(&self) -> Result<bool> {
        debug!("bond state of {} is managed by the OS, assuming paired", self.address);
        Ok(true)
    }

    async fn is_connected(&self) -> Result<bool> {
        Ok(self.peripheral.is_connected().await?)
    }

    async fn connect(&self) -> Result<()> {
        self.peripheral.connect().await.context("Failed to establish a connection")?;
        self.peripheral.discover_services().await.context("Service discovery failed")?;
        debug!("{} characteristics discovered", self.peripheral.characteristics().len());
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await.context("Failed to disconnect")?;
        Ok(())
    }

    async fn write(&self, char: uuid::Uuid, bytes: &[u8]) -> Result<()> {
        let char = self.characteristic(char)?;
        self.peripheral.write(&char, bytes, WriteType::WithResponse).await?;
        Ok(())
    }

    async fn read(&self, char: uuid::Uuid) -> Result<Vec<u8>> {
        let char = self.characteristic(char)?;
        Ok(self.peripheral.read(&char).await?)
    }
}
