use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{config::Config, reading::Reading, registry::RegistryHandle};

/// Where readings currently come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// From the device.
    Live,

    /// From the synthetic generator.
    Synthetic,
}

/// The state of the device connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// The device path does not exist.
    Absent,

    /// Another process has the device.
    Busy,

    /// An attempt to open the device is in progress.
    Connecting,

    /// The device is open and being read.
    Open,

    /// The device failed and will be retried (or given up on).
    Failed,
}

/// The most recent reading relayed, and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastReading {
    /// When it was relayed.
    pub at: DateTime<Utc>,

    /// The reading itself.
    pub reading: Reading,
}

/// What the acquisition task is up to.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceStatus {
    /// See [`Mode`].
    pub mode: Mode,

    /// `None` when running synthetic by configuration, since the device is never touched.
    pub connection: Option<ConnectionState>,

    /// See [`LastReading`].
    pub last_reading: Option<LastReading>,

    /// Consecutive failed attempts at the device.
    pub reconnect_attempts: u32,
}

impl SourceStatus {
    /// The status before the acquisition task has done anything.
    pub fn initial(config: &Config) -> Self {
        let (mode, connection) = if config.synthetic {
            (Mode::Synthetic, None)
        } else {
            (Mode::Live, Some(ConnectionState::Connecting))
        };

        Self {
            mode,
            connection,
            last_reading: None,
            reconnect_attempts: 0,
        }
    }
}

/// Create the channel the acquisition task publishes its status on.
pub(crate) fn channel(initial: SourceStatus) -> (StatusPublisher, watch::Receiver<SourceStatus>) {
    let (tx, rx) = watch::channel(initial);

    (StatusPublisher(tx), rx)
}

/// The writing end of the status channel.
/// Only the acquisition task holds this.
#[derive(Debug)]
pub(crate) struct StatusPublisher(watch::Sender<SourceStatus>);

impl StatusPublisher {
    pub(crate) fn set_mode(&self, mode: Mode) {
        self.0.send_if_modified(|status| {
            let changed = status.mode != mode;
            status.mode = mode;
            changed
        });
    }

    pub(crate) fn set_connection(&self, connection: Option<ConnectionState>) {
        self.0.send_modify(|status| status.connection = connection);
    }

    pub(crate) fn set_reconnect_attempts(&self, attempts: u32) {
        self.0
            .send_modify(|status| status.reconnect_attempts = attempts);
    }

    pub(crate) fn record_reading(&self, reading: &Reading) {
        self.0.send_modify(|status| {
            status.last_reading = Some(LastReading {
                at: Utc::now(),
                reading: reading.clone(),
            })
        });
    }
}

/// The answer to a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Always `"ok"`, a status query does not fail.
    pub status: String,

    /// Registered subscribers.
    pub connected_clients: usize,

    /// Whether readings are synthetic right now.
    pub synthetic: bool,

    /// Same as `synthetic`, kept for dashboards which ask for this name.
    pub mock_data: bool,

    /// See [`Mode`].
    pub mode: Mode,

    /// See [`ConnectionState`].
    pub connection: Option<ConnectionState>,

    /// When the last reading was relayed.
    pub last_reading: Option<DateTime<Utc>>,

    /// Consecutive failed attempts at the device.
    pub reconnect_attempts: u32,
}

impl StatusReport {
    /// An example report, as if a device had been running for a while.
    pub fn example() -> Self {
        Self {
            status: "ok".into(),
            connected_clients: 2,
            synthetic: false,
            mock_data: false,
            mode: Mode::Live,
            connection: Some(ConnectionState::Open),
            last_reading: Some(Utc::now()),
            reconnect_attempts: 0,
        }
    }
}

/// Answers status queries.
/// Only ever reads from the acquisition status and the registry.
#[derive(Debug, Clone)]
pub struct StatusResponder {
    source: watch::Receiver<SourceStatus>,
    registry: RegistryHandle,
}

impl StatusResponder {
    pub(crate) fn new(source: watch::Receiver<SourceStatus>, registry: RegistryHandle) -> Self {
        Self { source, registry }
    }

    /// The current status.
    pub fn report(&self) -> StatusReport {
        let source = self.source.borrow();
        let synthetic = source.mode == Mode::Synthetic;

        StatusReport {
            status: "ok".into(),
            connected_clients: self.registry.count(),
            synthetic,
            mock_data: synthetic,
            mode: source.mode,
            connection: source.connection,
            last_reading: source.last_reading.as_ref().map(|last| last.at),
            reconnect_attempts: source.reconnect_attempts,
        }
    }

    /// The most recent reading, if any was relayed yet.
    pub fn last_reading(&self) -> Option<Reading> {
        self.source
            .borrow()
            .last_reading
            .as_ref()
            .map(|last| last.reading.clone())
    }
}
