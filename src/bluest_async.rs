//! BLE link over the `bluest` crate.
//!
//! The devices expose a serial-over-GATT service: commands go to the write
//! characteristic, response chunks arrive as notifications on the notify
//! characteristic.

use std::time::Duration;

use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device, Uuid};
use futures_util::StreamExt;
use tokio::task::JoinHandle;

use crate::error::LinkError;
use crate::session::{ChunkSink, Link, Transport};

/// Serial service exposed by the BMS.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000ff00_0000_1000_8000_00805f9b34fb);
/// Notifications with response chunks.
pub const NOTIFY_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x0000ff01_0000_1000_8000_00805f9b34fb);
/// Command frames are written here.
pub const WRITE_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x0000ff02_0000_1000_8000_00805f9b34fb);

/// How long to scan for an advertising device before giving up.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

fn transport_err(err: impl std::fmt::Display) -> LinkError {
    LinkError::Transport(err.to_string())
}

/// Opens [`BleLink`]s by advertised device name.
pub struct BleTransport {
    adapter: Adapter,
}

impl BleTransport {
    /// Grabs the default adapter and waits until it is powered on.
    pub async fn new() -> Result<Self, LinkError> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| LinkError::Transport("no default Bluetooth adapter".into()))?;
        adapter.wait_available().await.map_err(transport_err)?;
        Ok(Self { adapter })
    }

    async fn discover(&self, name: &str) -> Result<Device, LinkError> {
        let mut scan = self
            .adapter
            .scan(&[SERVICE_UUID])
            .await
            .map_err(transport_err)?;
        while let Some(discovered) = scan.next().await {
            let device_name = discovered
                .device
                .name_async()
                .await
                .unwrap_or_default();
            log::trace!("Advertising device: {device_name}");
            if device_name == name {
                return Ok(discovered.device);
            }
        }
        Err(LinkError::Transport(format!("device {name} not found")))
    }
}

#[async_trait]
impl Transport for BleTransport {
    type Link = BleLink;

    async fn open(&mut self, address: &str) -> Result<Self::Link, LinkError> {
        let device = tokio::time::timeout(DISCOVERY_TIMEOUT, self.discover(address))
            .await
            .map_err(|_| {
                LinkError::Transport(format!("device {address} not seen within {DISCOVERY_TIMEOUT:?}"))
            })??;

        self.adapter
            .connect_device(&device)
            .await
            .map_err(transport_err)?;

        let service = device
            .discover_services_with_uuid(SERVICE_UUID)
            .await
            .map_err(transport_err)?
            .first()
            .ok_or_else(|| LinkError::Transport("serial service missing".into()))?
            .clone();
        let write = service
            .discover_characteristics_with_uuid(WRITE_CHARACTERISTIC_UUID)
            .await
            .map_err(transport_err)?
            .first()
            .ok_or_else(|| LinkError::Transport("write characteristic missing".into()))?
            .clone();
        let notify = service
            .discover_characteristics_with_uuid(NOTIFY_CHARACTERISTIC_UUID)
            .await
            .map_err(transport_err)?
            .first()
            .ok_or_else(|| LinkError::Transport("notify characteristic missing".into()))?
            .clone();

        log::debug!("Connected to {address}");
        Ok(BleLink {
            device,
            write,
            notify,
            forwarder: None,
        })
    }

    async fn close(&mut self, link: Self::Link) {
        if let Err(err) = self.adapter.disconnect_device(&link.device).await {
            log::warn!("Disconnect failed: {err}");
        }
    }
}

/// One GATT connection to a device.
pub struct BleLink {
    device: Device,
    write: Characteristic,
    notify: Characteristic,
    forwarder: Option<JoinHandle<()>>,
}

impl Drop for BleLink {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

#[async_trait]
impl Link for BleLink {
    async fn is_connected(&self) -> bool {
        self.device.is_connected().await
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.write.write(bytes).await.map_err(transport_err)
    }

    async fn subscribe(&mut self, sink: ChunkSink) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        let notify = self.notify.clone();
        // Notifications carry no end-of-message marker, so every chunk is
        // delivered without a finality hint.
        self.forwarder = Some(tokio::spawn(async move {
            let mut stream = match notify.notify().await {
                Ok(stream) => stream,
                Err(err) => {
                    log::warn!("Failed to subscribe to notifications: {err}");
                    return;
                }
            };
            while let Some(item) = stream.next().await {
                match item {
                    Ok(chunk) => sink.deliver(&chunk, false),
                    Err(err) => {
                        log::warn!("Notification stream error: {err}");
                        break;
                    }
                }
            }
        }));
    }
}
