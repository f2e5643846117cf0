/// Codecs for decoding messages from the wire.
pub mod codecs;

/// Opening the serial port.
pub(crate) mod serial_port;
