#![allow(dead_code)]

//! In-memory breezer behind the transport traits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use tion2mqtt::protocol::{FRAME_LEN, tion_uuids};
use tion2mqtt::{Gate, StateNotifier, StateReport, Status, TionTransport, TionTransportManager};

pub const ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

#[derive(Default)]
pub struct DeviceState {
    pub paired: bool,
    pub connected: bool,
    pub status: Status,
    /// Every frame written, in order
    pub writes: Vec<Vec<u8>>,
    pub connects: usize,
    pub disconnects: usize,
    /// Reads never complete
    pub stall_reads: bool,
    /// Reads complete after this long
    pub read_delay: Option<Duration>,
    /// Served instead of the encoded status
    pub response: Option<Vec<u8>>,
    /// Teardown reports an error (the link still goes down)
    pub fail_disconnect: bool,
    /// The link drops during the next read
    pub drop_on_read: bool,
}

#[derive(Clone)]
pub struct FakeDevice(Arc<Mutex<DeviceState>>);

impl FakeDevice {
    pub fn new(status: Status) -> Self {
        FakeDevice(Arc::new(Mutex::new(DeviceState {
            paired: true,
            status,
            ..Default::default()
        })))
    }

    pub fn unpaired(status: Status) -> Self {
        let device = Self::new(status);
        device.with(|d| d.paired = false);
        device
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut DeviceState) -> R) -> R {
        f(&mut self.0.lock().unwrap())
    }

    pub fn status(&self) -> Status {
        self.with(|d| d.status)
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.with(|d| d.writes.clone())
    }

    /// Set-params commands received so far
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.writes().into_iter().filter(|w| w[1] == 0x02).collect()
    }
}

fn apply_set_params(status: &mut Status, frame: &[u8]) {
    status.speed = frame[2];
    status.target = frame[3] as i8;
    status.gate = Gate::from(frame[4]);
    status.heater = frame[5] & 0x01 != 0;
    status.on = frame[5] & 0x02 != 0;
    status.timer = frame[5] & 0x04 != 0;
    status.sound = frame[5] & 0x08 != 0;
}

impl TionTransport for FakeDevice {
    async fn is_paired(&self) -> Result<bool> {
        Ok(self.with(|d| d.paired))
    }

    async fn is_connected(&self) -> Result<bool> {
        Ok(self.with(|d| d.connected))
    }

    async fn connect(&self) -> Result<()> {
        self.with(|d| {
            d.connects += 1;
            d.connected = true;
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.with(|d| {
            d.disconnects += 1;
            d.connected = false;
            if d.fail_disconnect { Err(anyhow!("teardown failed")) } else { Ok(()) }
        })
    }

    async fn write(&self, char: uuid::Uuid, bytes: &[u8]) -> Result<()> {
        anyhow::ensure!(char == tion_uuids::WRITE, "write to unexpected characteristic {}", char);
        anyhow::ensure!(bytes.len() == FRAME_LEN, "unexpected frame length {}", bytes.len());
        self.with(|d| {
            anyhow::ensure!(d.connected, "not connected");
            d.writes.push(bytes.to_vec());
            if bytes[1] == 0x02 {
                apply_set_params(&mut d.status, bytes);
            }
            Ok(())
        })
    }

    async fn read(&self, char: uuid::Uuid) -> Result<Vec<u8>> {
        anyhow::ensure!(char == tion_uuids::READ, "read from unexpected characteristic {}", char);
        if self.with(|d| d.stall_reads) {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.with(|d| d.read_delay) {
            tokio::time::sleep(delay).await;
        }
        self.with(|d| {
            if d.drop_on_read {
                d.connected = false;
                return Err(anyhow!("link dropped"));
            }
            anyhow::ensure!(d.connected, "not connected");
            Ok(d.response.clone().unwrap_or_else(|| d.status.encode().to_vec()))
        })
    }
}

#[derive(Default)]
pub struct FakeManager {
    devices: HashMap<String, FakeDevice>,
    lookups: Arc<AtomicUsize>,
}

impl FakeManager {
    pub fn with_device(mut self, address: &str, device: FakeDevice) -> Self {
        self.devices.insert(address.to_string(), device);
        self
    }

    /// Shared lookup counter, readable after the manager moved into a session
    pub fn lookups(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.lookups)
    }
}

impl TionTransportManager for FakeManager {
    type Transport = FakeDevice;

    async fn find(&self, address: &str) -> Result<Option<FakeDevice>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.devices.get(address).cloned())
    }
}

#[derive(Clone, Default)]
pub struct RecordingNotifier(Arc<Mutex<Vec<StateReport>>>);

impl RecordingNotifier {
    pub fn reports(&self) -> Vec<StateReport> {
        self.0.lock().unwrap().clone()
    }
}

impl StateNotifier for RecordingNotifier {
    async fn state_changed(&self, report: &StateReport) -> Result<()> {
        self.0.lock().unwrap().push(report.clone());
        Ok(())
    }
}

/// `{on:true, speed:2, heater:false, target:20, gate:closed, sound:true}`
pub fn running() -> Status {
    Status {
        on: true,
        speed: 2,
        heater: false,
        target: 20,
        gate: Gate::Closed,
        sound: true,
        temp_in: 18,
        temp_out: -3,
        filter_days: 180,
        firmware: 0x0204,
        ..Default::default()
    }
}
