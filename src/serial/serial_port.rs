use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::io::{AsyncRead, ReadBuf};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt};
use tracing::{debug, info, warn};

use crate::{config::DeviceConfig, error::Error};

/// Something readable the acquisition can pull device bytes from.
pub(crate) type DeviceStream = Box<dyn AsyncRead + Send + Unpin>;

/// Opens the device.
///
/// Implemented for real serial ports, and by tests for in-memory devices.
pub(crate) trait Connector: Send + Sync {
    /// Where the device lives, for logging.
    fn path(&self) -> &str;

    /// Try to open the device once.
    fn connect(&self) -> Result<DeviceStream, Error>;
}

/// Opens a tty/COM port.
#[derive(Debug, Clone)]
pub(crate) struct SerialConnector {
    path: String,
    baud: u32,
    flow_control: serialport::FlowControl,
}

impl SerialConnector {
    pub(crate) fn new(device: &DeviceConfig) -> Self {
        Self {
            path: device.path.clone(),
            baud: device.baud,
            flow_control: serialport::FlowControl::None,
        }
    }

    fn classify(&self, e: tokio_serial::Error) -> Error {
        let description = e.to_string().to_lowercase();

        // Windows reports a port in use as access denied.
        if description.contains("busy") || description.contains("denied") {
            return Error::DeviceBusy(self.path.clone());
        }

        match e.kind() {
            serialport::ErrorKind::NoDevice => Error::DeviceAbsent(self.path.clone()),
            _ => Error::Io(io::Error::from(e)),
        }
    }
}

impl Connector for SerialConnector {
    fn path(&self) -> &str {
        &self.path
    }

    fn connect(&self) -> Result<DeviceStream, Error> {
        // COM ports are not files, so only check this where ttys are.
        #[cfg(unix)]
        if !std::path::Path::new(&self.path).exists() {
            return Err(Error::DeviceAbsent(self.path.clone()));
        }

        debug!(path = %self.path, baud = self.baud, "Opening serial port");

        let stream = tokio_serial::new(&self.path, self.baud)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(self.flow_control)
            .open_native_async()
            .map_err(|e| self.classify(e))?;

        // Whatever the device sent before we were listening is likely a torn line.
        match stream.clear(ClearBuffer::Input) {
            Ok(()) => debug!("Flushed pending input"),
            Err(e) => warn!(?e, "Could not flush pending input"),
        }

        info!(path = %self.path, baud = self.baud, "Connected to serial port");

        Ok(Box::new(OpenDevice {
            path: self.path.clone(),
            inner: stream,
        }))
    }
}

/// An open device.
/// Dropping it closes the underlying handle, on every exit path.
pub(crate) struct OpenDevice<S> {
    path: String,
    inner: S,
}

impl<S> Drop for OpenDevice<S> {
    fn drop(&mut self) {
        info!(path = %self.path, "Serial connection closed");
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for OpenDevice<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}
