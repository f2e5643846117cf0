use std::{io, string, time::Duration};

use thiserror::Error;

use crate::registry::SubscriberId;

/// Errors that may occur while relaying readings.
#[derive(Debug, Error)]
pub enum Error {
    /// The configured device path does not exist.
    #[error("The device `{0}` does not exist")]
    DeviceAbsent(String),

    /// The device exists but another process holds it.
    #[error("The device `{0}` is busy")]
    DeviceBusy(String),

    /// Opening or reading the device failed.
    #[error("Underlying IO problem: {0}")]
    Io(#[from] io::Error),

    /// A line from the device was not valid UTF-8.
    #[error("Problem with UTF8 conversion")]
    Decode(#[from] string::FromUtf8Error),

    /// A field of an otherwise well-formed line could not be parsed.
    #[error("Invalid {field} value: `{value}`")]
    Parse {
        /// The reading field, e.g. `ph`.
        field: &'static str,

        /// The offending raw value.
        value: String,
    },

    /// A subscriber did not accept a message in time, or went away.
    #[error("Could not send to subscriber {id}: {problem}")]
    SubscriberSend {
        /// The subscriber which failed.
        id: SubscriberId,

        /// What went wrong.
        problem: String,
    },

    /// The device closed the connection.
    #[error("The device `{0}` closed the connection")]
    Disconnected(String),

    /// The device was open but nothing arrived for too long.
    #[error("No data from the device for {0:?}")]
    Stale(Duration),

    /// The configuration is not valid.
    #[error("Bad configuration: {0}")]
    BadConfig(String),

    /// The websocket transport had a problem.
    #[error("Websocket issue: {0}")]
    WebsocketIssue(String),

    /// The subscriber registry is no longer running.
    #[error("The subscriber registry has shut down")]
    RegistryGone,
}

impl Error {
    /// Unwrap the error as a bad configuration, if it is one.
    pub fn try_into_bad_config(self) -> Result<String, Self> {
        if let Self::BadConfig(v) = self {
            Ok(v)
        } else {
            Err(self)
        }
    }
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Self::WebsocketIssue(e.to_string())
    }
}
