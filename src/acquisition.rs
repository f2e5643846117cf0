//! The acquisition task owns the device.
//!
//! It opens the device, relays what it reads, and reconnects after failures.
//! Once the device failed too many times in a row, synthetic readings are relayed instead.
//! Nothing in here ends the process: the task runs until it is aborted.

use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    config::{Config, WhenExhausted},
    error::Error,
    reading::Reading,
    registry::RegistryHandle,
    serial::serial_port::{Connector, SerialConnector},
    source::{ReadingSource, SerialSource, SyntheticSource},
    status::{ConnectionState, Mode, StatusPublisher},
    synthetic::SyntheticGenerator,
};

enum Phase {
    Connecting,
    Backoff(Duration),
    Exhausted,
}

fn connection_state(e: &Error) -> ConnectionState {
    match e {
        Error::DeviceAbsent(_) => ConnectionState::Absent,
        Error::DeviceBusy(_) => ConnectionState::Busy,
        _ => ConnectionState::Failed,
    }
}

struct Acquisition {
    /// `None` when configured to never touch the device.
    connector: Option<Arc<dyn Connector>>,
    config: Config,
    registry: RegistryHandle,
    status: StatusPublisher,

    /// Consecutive failures, reset by a reading from the device.
    failures: u32,

    /// Kept between synthetic windows so the values carry on where they left off.
    synthetic: Option<SyntheticSource>,
}

impl Acquisition {
    fn synthetic_source(&mut self) -> ReadingSource {
        let source = self.synthetic.take().unwrap_or_else(|| {
            SyntheticSource::new(SyntheticGenerator::new(), self.config.synthetic_interval())
        });

        self.status.set_mode(Mode::Synthetic);

        ReadingSource::Synthetic(source)
    }

    fn open(&mut self, connector: &dyn Connector) -> Result<ReadingSource, Error> {
        self.status.set_connection(Some(ConnectionState::Connecting));

        let stream = connector.connect()?;

        self.status.set_connection(Some(ConnectionState::Open));
        self.status.set_mode(Mode::Live);

        Ok(ReadingSource::Serial(SerialSource::new(
            connector.path(),
            stream,
            self.config.poll_interval(),
            self.config.stale_after(),
        )))
    }

    fn after_failure(&mut self, e: Error) -> Phase {
        self.failures = self.failures.saturating_add(1);
        self.status.set_connection(Some(connection_state(&e)));
        self.status.set_reconnect_attempts(self.failures);

        let max_attempts = self.config.retry.max_attempts;

        if self.failures >= max_attempts {
            error!(%e, failures = self.failures, "Device attempts exhausted");
            Phase::Exhausted
        } else {
            let delay = self.config.retry.delay_for(self.failures);
            warn!(%e, attempt = self.failures, max_attempts, ?delay, "Device failed, retrying");
            Phase::Backoff(delay)
        }
    }

    async fn publish(&mut self, reading: Reading) {
        self.status.record_reading(&reading);

        let payload = match serde_json::to_string(&reading) {
            Ok(json) => json,
            Err(e) => {
                warn!(%e, %reading, "Could not serialize reading");
                return;
            }
        };

        let delivery = self.registry.deliver(payload.into()).await;
        debug!(%reading, delivered = delivery.delivered, "Relayed");
    }

    /// Relay readings from the source.
    ///
    /// With a deadline, returns `Ok` once it passes.
    /// Otherwise only returns when the source fails.
    async fn relay(
        &mut self,
        source: &mut ReadingSource,
        until: Option<Instant>,
    ) -> Result<(), Error> {
        loop {
            let reading = match until {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, source.next_reading()).await {
                        Ok(reading) => reading?,
                        Err(_) => return Ok(()),
                    }
                }
                None => source.next_reading().await?,
            };

            if source.mode() == Mode::Live && self.failures > 0 {
                info!(after = self.failures, "Device recovered");
                self.failures = 0;
                self.status.set_reconnect_attempts(0);
            }

            self.publish(reading).await;
        }
    }

    async fn run_synthetic_forever(&mut self) {
        let mut source = self.synthetic_source();

        if let Err(e) = self.relay(&mut source, None).await {
            // Synthetic sources do not fail.
            error!(%e, "Synthetic source stopped");
        }
    }

    async fn run(mut self) {
        let Some(connector) = self.connector.clone() else {
            info!("Relaying synthetic readings, the device is never opened");
            self.run_synthetic_forever().await;
            return;
        };

        let mut phase = Phase::Connecting;

        loop {
            phase = match phase {
                Phase::Connecting => match self.open(connector.as_ref()) {
                    Ok(mut source) => match self.relay(&mut source, None).await {
                        Ok(()) => Phase::Connecting,
                        Err(e) => self.after_failure(e),
                    },
                    Err(e) => self.after_failure(e),
                },
                Phase::Backoff(delay) => {
                    tokio::time::sleep(delay).await;
                    Phase::Connecting
                }
                Phase::Exhausted => match self.config.retry.when_exhausted {
                    WhenExhausted::Synthetic => {
                        warn!("Switching to synthetic readings for good");
                        self.run_synthetic_forever().await;
                        return;
                    }
                    WhenExhausted::KeepRetrying { every_ms } => {
                        let every = Duration::from_millis(every_ms);
                        info!(?every, "Relaying synthetic readings until the next attempt");

                        let mut source = self.synthetic_source();
                        let deadline = Instant::now() + every;

                        if let Err(e) = self.relay(&mut source, Some(deadline)).await {
                            error!(%e, "Synthetic source stopped");
                        }

                        if let ReadingSource::Synthetic(synthetic) = source {
                            self.synthetic = Some(synthetic);
                        }

                        Phase::Connecting
                    }
                },
            }
        }
    }
}

/// The running acquisition task.
/// Dropping the handle stops it, which also closes the device.
#[derive(Debug)]
pub(crate) struct AcquisitionHandle {
    join_handle: JoinHandle<()>,
}

impl AcquisitionHandle {
    /// Start relaying readings to the registry.
    pub(crate) fn spawn(config: &Config, registry: RegistryHandle, status: StatusPublisher) -> Self {
        let connector: Option<Arc<dyn Connector>> = if config.synthetic {
            None
        } else {
            Some(Arc::new(SerialConnector::new(&config.device)))
        };

        Self::spawn_with(connector, config, registry, status)
    }

    pub(crate) fn spawn_with(
        connector: Option<Arc<dyn Connector>>,
        config: &Config,
        registry: RegistryHandle,
        status: StatusPublisher,
    ) -> Self {
        let span = match &connector {
            Some(connector) => info_span!("Acquisition", device = %connector.path()),
            None => info_span!("Acquisition", device = "synthetic"),
        };

        let acquisition = Acquisition {
            connector,
            config: config.clone(),
            registry,
            status,
            failures: 0,
            synthetic: None,
        };

        Self {
            join_handle: tokio::spawn(acquisition.run().instrument(span)),
        }
    }
}

impl Drop for AcquisitionHandle {
    fn drop(&mut self) {
        self.join_handle.abort();
    }
}
