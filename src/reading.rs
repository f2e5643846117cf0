use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Error;

/// An example of a line as the device puts it on the wire.
pub const EXAMPLE_LINE: &str = "pH:6.20,temp:23.20,water:medium,tds:652";

/// One sample from the device (or the synthetic generator).
///
/// Serializes to the JSON sent to every subscriber:
/// `{"ph":6.2,"temperature":23.2,"waterLevel":"medium","tds":652}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    /// Acidity.
    pub ph: f64,

    /// Water temperature in degrees Celsius.
    pub temperature: f64,

    /// Coarse water level of the reservoir.
    pub water_level: WaterLevel,

    /// Total dissolved solids, in ppm.
    pub tds: i64,
}

impl Reading {
    /// An example reading, matching [`EXAMPLE_LINE`].
    pub fn example() -> Self {
        Self {
            ph: 6.2,
            temperature: 23.2,
            water_level: WaterLevel::Medium,
            tds: 652,
        }
    }

    /// Format the reading the way the device would send it (without the line terminator).
    pub fn to_wire(&self) -> String {
        format!(
            "pH:{},temp:{},water:{},tds:{}",
            self.ph, self.temperature, self.water_level, self.tds
        )
    }
}

impl Display for Reading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pH {:.2}, {:.2}°C, water {}, tds {}",
            self.ph, self.temperature, self.water_level, self.tds
        )
    }
}

/// The water level as reported by the device.
///
/// Devices are expected to report one of three levels,
/// but anything else is kept verbatim (lowercased) instead of rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WaterLevel {
    /// Low.
    Low,

    /// Medium.
    Medium,

    /// High.
    High,

    /// Something the device sent which is not one of the known levels.
    Other(String),
}

impl WaterLevel {
    /// Borrowed form.
    pub fn as_str(&self) -> &str {
        match self {
            WaterLevel::Low => "low",
            WaterLevel::Medium => "medium",
            WaterLevel::High => "high",
            WaterLevel::Other(other) => other,
        }
    }

    /// The neighbouring level, one step up or down.
    /// Stays put at either end of the scale, and for unknown levels.
    pub fn step(&self, up: bool) -> Self {
        match (self, up) {
            (WaterLevel::Low, true) => WaterLevel::Medium,
            (WaterLevel::Medium, true) => WaterLevel::High,
            (WaterLevel::High, false) => WaterLevel::Medium,
            (WaterLevel::Medium, false) => WaterLevel::Low,
            (level, _) => level.clone(),
        }
    }
}

impl From<String> for WaterLevel {
    fn from(s: String) -> Self {
        let s = s.to_lowercase();
        match s.as_str() {
            "low" => Self::Low,
            "medium" => Self::Medium,
            "high" => Self::High,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for WaterLevel {
    fn from(s: &str) -> Self {
        Self::from(s.to_owned())
    }
}

impl From<WaterLevel> for String {
    fn from(level: WaterLevel) -> Self {
        match level {
            WaterLevel::Other(other) => other,
            known => known.as_str().into(),
        }
    }
}

impl Display for WaterLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Default)]
struct PartialReading {
    ph: Option<f64>,
    temperature: Option<f64>,
    water_level: Option<WaterLevel>,
    tds: Option<i64>,
}

impl PartialReading {
    fn complete(self) -> Result<Reading, Self> {
        match self {
            PartialReading {
                ph: Some(ph),
                temperature: Some(temperature),
                water_level: Some(water_level),
                tds: Some(tds),
            } => Ok(Reading {
                ph,
                temperature,
                water_level,
                tds,
            }),
            incomplete => Err(incomplete),
        }
    }
}

fn parse_field<T: FromStr>(field: &'static str, value: &str) -> Result<T, Error> {
    value.parse().map_err(|_| Error::Parse {
        field,
        value: value.into(),
    })
}

/// Like [`parse_field`], but `nan` and infinities are malformed too.
/// They cannot be represented as JSON numbers.
fn parse_finite(field: &'static str, value: &str) -> Result<f64, Error> {
    let number: f64 = parse_field(field, value)?;

    if number.is_finite() {
        Ok(number)
    } else {
        Err(Error::Parse {
            field,
            value: value.into(),
        })
    }
}

/// Parse one line of device output into a [`Reading`].
///
/// Tokens are comma separated `key:value` pairs with case-insensitive keys
/// (`ph`, `temp`/`temperature`, `water`/`waterlevel`, `tds`).
/// Numeric values which do not parse are logged and left out,
/// and unknown keys are ignored.
///
/// Returns `None` unless all four fields ended up present.
pub fn parse_line(line: &str) -> Option<Reading> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let mut partial = PartialReading::default();

    for token in line.split(',') {
        let mut key_value = token.split(':');
        let (Some(key), Some(value), None) = (key_value.next(), key_value.next(), key_value.next()) else {
            continue;
        };

        let value = value.trim();

        let parsed = match key.trim().to_lowercase().as_str() {
            "ph" => parse_finite("ph", value).map(|ph| partial.ph = Some(ph)),
            "temp" | "temperature" => {
                parse_finite("temperature", value).map(|t| partial.temperature = Some(t))
            }
            "water" | "waterlevel" => {
                partial.water_level = Some(WaterLevel::from(value));
                Ok(())
            }
            "tds" => parse_field("tds", value).map(|tds| partial.tds = Some(tds)),
            _ => Ok(()),
        };

        if let Err(e) = parsed {
            warn!(%e, "Dropping field");
        }
    }

    match partial.complete() {
        Ok(reading) => {
            debug!(%reading, "Parsed reading");
            Some(reading)
        }
        Err(partial) => {
            warn!(
                ?partial,
                "Incomplete or invalid data, expected a line such as `{EXAMPLE_LINE}`"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::synthetic::SyntheticGenerator;

    #[test]
    fn example_line() {
        let reading = parse_line("pH:6.20,temp:23.20,water:medium,tds:652").unwrap();

        assert_eq!(
            reading,
            Reading {
                ph: 6.2,
                temperature: 23.2,
                water_level: WaterLevel::Medium,
                tds: 652
            }
        );
    }

    #[test]
    fn example_serializes_to_broadcast_json() {
        let json = serde_json::to_value(Reading::example()).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "ph": 6.2,
                "temperature": 23.2,
                "waterLevel": "medium",
                "tds": 652
            })
        );
    }

    #[test]
    fn bad_ph_means_no_reading() {
        assert_eq!(parse_line("pH:abc,temp:23.2,water:low,tds:100"), None);
    }

    #[test]
    fn bad_tds_means_no_reading() {
        assert_eq!(parse_line("pH:7,temp:23.2,water:low,tds:1.5"), None);
    }

    #[test]
    fn each_missing_field_means_no_reading() {
        let tokens = ["pH:6.2", "temp:23.2", "water:medium", "tds:652"];

        for skip in 0..tokens.len() {
            let line = tokens
                .iter()
                .enumerate()
                .filter(|(index, _)| *index != skip)
                .map(|(_, token)| *token)
                .collect::<Vec<_>>()
                .join(",");

            assert_eq!(parse_line(&line), None, "line: {line}");
        }
    }

    #[test]
    fn keys_are_case_insensitive_and_have_aliases() {
        let reading =
            parse_line("PH:7.1,Temperature:19.5,WaterLevel:HIGH,TDS:1200").unwrap();

        assert_eq!(
            reading,
            Reading {
                ph: 7.1,
                temperature: 19.5,
                water_level: WaterLevel::High,
                tds: 1200
            }
        );
    }

    #[test]
    fn whitespace_and_unknown_keys_are_tolerated() {
        let reading =
            parse_line(" pH : 5.5 , humidity:40, temp: 21 ,water: low,tds:300 \r").unwrap();

        assert_eq!(
            reading,
            Reading {
                ph: 5.5,
                temperature: 21.0,
                water_level: WaterLevel::Low,
                tds: 300
            }
        );
    }

    #[test]
    fn unknown_water_level_is_kept_lowercased() {
        let reading = parse_line("pH:6,temp:20,water:Overflowing,tds:500").unwrap();

        assert_eq!(
            reading.water_level,
            WaterLevel::Other("overflowing".into())
        );
        assert_eq!(
            serde_json::to_value(&reading).unwrap()["waterLevel"],
            "overflowing"
        );
    }

    #[test]
    fn malformed_tokens_are_ignored() {
        // The extra colon makes the first pH token unusable, the second one wins.
        let reading = parse_line("pH:6:1,pH:6.4,temp:20,water:low,tds:500").unwrap();

        assert_eq!(reading.ph, 6.4);
    }

    #[test]
    fn non_finite_numbers_mean_no_reading() {
        for line in [
            "pH:nan,temp:23.2,water:low,tds:100",
            "pH:NaN,temp:23.2,water:low,tds:100",
            "pH:7,temp:inf,water:low,tds:100",
            "pH:7,temp:-infinity,water:low,tds:100",
        ] {
            assert_eq!(parse_line(line), None, "line: {line}");
        }
    }

    #[test]
    fn empty_line_is_no_reading() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("   "), None);
    }

    #[test]
    fn wire_format_reparses_to_same_reading() {
        let readings = [
            Reading::example(),
            Reading {
                ph: 4.0,
                temperature: 35.0,
                water_level: WaterLevel::Low,
                tds: 200,
            },
            Reading {
                ph: 8.123456789,
                temperature: -1.5,
                water_level: WaterLevel::Other("dry".into()),
                tds: -3,
            },
        ];

        for reading in readings {
            assert_eq!(parse_line(&reading.to_wire()), Some(reading.clone()));
        }
    }

    #[test]
    fn wire_format_reparses_for_generated_readings() {
        for seed in [1, 2, 3] {
            for reading in SyntheticGenerator::with_seed(seed).take(2_000) {
                assert_eq!(parse_line(&reading.to_wire()), Some(reading.clone()));
            }
        }
    }

    #[test]
    fn water_level_steps() {
        assert_eq!(WaterLevel::Low.step(true), WaterLevel::Medium);
        assert_eq!(WaterLevel::Medium.step(true), WaterLevel::High);
        assert_eq!(WaterLevel::High.step(true), WaterLevel::High);
        assert_eq!(WaterLevel::High.step(false), WaterLevel::Medium);
        assert_eq!(WaterLevel::Low.step(false), WaterLevel::Low);
    }
}
