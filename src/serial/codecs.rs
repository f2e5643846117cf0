/// Splits device output into lines.
pub mod lines;
