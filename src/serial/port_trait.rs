//! Trait abstraction for opening the telemetry device to enable testing

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::Result;

/// Opens the byte stream the flight controller writes telemetry to
#[async_trait]
pub trait DeviceOpener: Send + Sync + 'static {
    type Device: AsyncRead + Unpin + Send;

    /// Open the device, returning it together with the path that worked
    async fn open(&self) -> Result<(Self::Device, String)>;
}
