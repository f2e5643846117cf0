use std::{path::Path, time::Duration};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Error;

/// The serial device to read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// The path to the device.
    /// Likely "/dev/ttyUSBx", "/dev/ttyACMx" or "COMx".
    pub path: String,

    /// The baud rate the device talks at.
    pub baud: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: "/dev/ttyUSB0".into(),
            baud: 9600,
        }
    }
}

/// How long to wait between consecutive failed attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backoff {
    /// Always wait the base delay.
    Fixed,

    /// Double the base delay for every consecutive failure, up to a limit.
    Exponential {
        /// The longest wait, in milliseconds.
        max_delay_ms: u64,
    },
}

/// What to do once the device failed `max_attempts` times in a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WhenExhausted {
    /// Switch to synthetic readings for good.
    Synthetic,

    /// Relay synthetic readings, but try the device again periodically.
    /// Goes back to live readings once the device opens.
    KeepRetrying {
        /// How long to wait between attempts, in milliseconds.
        every_ms: u64,
    },
}

/// Reconnection tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Consecutive failures tolerated before giving up on the device.
    /// The count resets once a reading arrives.
    pub max_attempts: u32,

    /// Base wait between attempts, in milliseconds.
    pub delay_ms: u64,

    /// See [`Backoff`].
    pub backoff: Backoff,

    /// See [`WhenExhausted`].
    pub when_exhausted: WhenExhausted,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 3000,
            backoff: Backoff::Fixed,
            when_exhausted: WhenExhausted::Synthetic,
        }
    }
}

impl RetryConfig {
    /// How long to wait after the given number of consecutive failures.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let base = self.delay_ms;

        let ms = match self.backoff {
            Backoff::Fixed => base,
            Backoff::Exponential { max_delay_ms } => {
                let factor = 2u64.saturating_pow(failures.saturating_sub(1));
                base.saturating_mul(factor).min(max_delay_ms)
            }
        };

        Duration::from_millis(ms)
    }
}

/// The configuration used for running the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The device readings come from.
    pub device: DeviceConfig,

    /// Which port the HTTP/websocket server listens on.
    pub port: u16,

    /// Never touch the device, only relay synthetic readings.
    pub synthetic: bool,

    /// See [`RetryConfig`].
    pub retry: RetryConfig,

    /// How often the open device is checked for staleness, in milliseconds.
    pub poll_interval_ms: u64,

    /// An open device silent for this long is treated as failed, in milliseconds.
    pub stale_after_ms: u64,

    /// Time between synthetic readings, in milliseconds.
    pub synthetic_interval_ms: u64,

    /// How long a single subscriber may take to accept a message, in milliseconds.
    pub send_timeout_ms: u64,

    /// How many messages may queue up for a subscriber before it is considered too slow.
    pub subscriber_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            port: crate::server::DEFAULT_PORT,
            synthetic: false,
            retry: RetryConfig::default(),
            poll_interval_ms: 100,
            stale_after_ms: 10_000,
            synthetic_interval_ms: 2000,
            send_timeout_ms: 1000,
            subscriber_buffer: 32,
        }
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Self::ron()
            .from_str::<Config>(input)
            .map_err(|e| Error::BadConfig(format!("Not a valid config: {e}")))
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            device: DeviceConfig {
                path: "/dev/ttyACM0".into(),
                baud: 115_200,
            },
            retry: RetryConfig {
                backoff: Backoff::Exponential {
                    max_delay_ms: 30_000,
                },
                when_exhausted: WhenExhausted::KeepRetrying { every_ms: 60_000 },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> Result<String, Error> {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| Error::BadConfig(e.to_string()))
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let s = std::fs::read_to_string(p)?;

        Self::deserialize(&s)
    }

    /// The stale check interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The staleness threshold.
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    /// The synthetic cadence.
    pub fn synthetic_interval(&self) -> Duration {
        Duration::from_millis(self.synthetic_interval_ms)
    }

    /// The per-subscriber send timeout.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Check the configuration makes sense.
    /// All problems are reported at once.
    pub fn validate(&self) -> Result<(), Error> {
        let mut problems = vec![];

        if self.device.baud == 0 {
            problems.push("the baud rate must be non-zero".to_string());
        }

        if self.retry.max_attempts == 0 {
            problems.push("retry.max_attempts must be at least 1".into());
        }

        if let WhenExhausted::KeepRetrying { every_ms: 0 } = self.retry.when_exhausted {
            problems.push("retry.when_exhausted every_ms must be non-zero".into());
        }

        for (name, value) in [
            ("poll_interval_ms", self.poll_interval_ms),
            ("stale_after_ms", self.stale_after_ms),
            ("synthetic_interval_ms", self.synthetic_interval_ms),
            ("send_timeout_ms", self.send_timeout_ms),
        ] {
            if value == 0 {
                problems.push(format!("{name} must be non-zero"));
            }
        }

        if self.subscriber_buffer == 0 {
            problems.push("subscriber_buffer must be at least 1".into());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::BadConfig(problems.iter().join(", ")))
        }
    }

    /// Log the settings the relay runs with.
    pub fn log_settings(&self) {
        info!(
            device = %self.device.path,
            baud = self.device.baud,
            port = self.port,
            synthetic = self.synthetic,
            "Starting relay"
        );
        info!(retry = ?self.retry, "Reconnection policy");
    }
}
