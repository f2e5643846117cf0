use std::time::Duration;

use futures::StreamExt;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::codec::FramedRead;
use tracing::{trace, warn};

use crate::{
    error::Error,
    reading::{parse_line, Reading},
    serial::{
        codecs::lines::{Line, LinesCodec},
        serial_port::DeviceStream,
    },
    status::Mode,
    synthetic::SyntheticGenerator,
};

fn interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Readings from an open device.
pub(crate) struct SerialSource {
    path: String,
    lines: FramedRead<DeviceStream, LinesCodec>,
    poll: Interval,
    stale_after: Duration,
}

impl SerialSource {
    pub(crate) fn new(
        path: &str,
        stream: DeviceStream,
        poll_interval: Duration,
        stale_after: Duration,
    ) -> Self {
        Self {
            path: path.into(),
            lines: FramedRead::new(stream, LinesCodec::default()),
            poll: interval(poll_interval),
            stale_after,
        }
    }

    /// Wait for the next valid reading.
    ///
    /// Lines which do not parse are skipped.
    /// Fails when the device errors, closes, or goes quiet for too long.
    async fn next_reading(&mut self) -> Result<Reading, Error> {
        loop {
            tokio::select! {
                line = self.lines.next() => match line {
                    Some(Ok(Line::Text(text))) => {
                        trace!(%text, "Line");
                        if let Some(reading) = parse_line(&text) {
                            return Ok(reading);
                        }
                    }
                    Some(Ok(Line::Discarded { bytes })) => {
                        warn!(bytes, path = %self.path, "Discarded device output");
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Err(Error::Disconnected(self.path.clone())),
                },
                _ = self.poll.tick() => {
                    let silent_for = self.lines.decoder().last_activity().elapsed();
                    if silent_for >= self.stale_after {
                        return Err(Error::Stale(silent_for));
                    }
                }
            }
        }
    }
}

/// Readings made up on a fixed cadence.
pub(crate) struct SyntheticSource {
    generator: SyntheticGenerator,
    cadence: Interval,
}

impl SyntheticSource {
    pub(crate) fn new(generator: SyntheticGenerator, cadence: Duration) -> Self {
        Self {
            generator,
            cadence: interval(cadence),
        }
    }

    async fn next_reading(&mut self) -> Reading {
        self.cadence.tick().await;
        self.generator.next_reading()
    }
}

/// Where the acquisition task gets readings from.
/// Picked anew each time the device is opened or given up on.
pub(crate) enum ReadingSource {
    Serial(SerialSource),
    Synthetic(SyntheticSource),
}

impl ReadingSource {
    pub(crate) async fn next_reading(&mut self) -> Result<Reading, Error> {
        match self {
            ReadingSource::Serial(serial) => serial.next_reading().await,
            ReadingSource::Synthetic(synthetic) => Ok(synthetic.next_reading().await),
        }
    }

    pub(crate) fn mode(&self) -> Mode {
        match self {
            ReadingSource::Serial(_) => Mode::Live,
            ReadingSource::Synthetic(_) => Mode::Synthetic,
        }
    }
}
