use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::ser::Error as _;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::value::RawValue;

use crate::error::RelayError;

/// The record shape this deployment ingests and broadcasts.
pub type ActiveRecord = MarkerFix;

/// Anything the ingestor can decode from a feed and fan out to peers.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Record for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Fiducial marker fix: marker id plus angular offset and range.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerFix {
    #[serde(rename = "markerId")]
    pub marker_id: i64,
    #[serde(serialize_with = "compact")]
    pub angle_x: f64,
    #[serde(serialize_with = "compact")]
    pub angle_y: f64,
    #[serde(serialize_with = "compact")]
    pub distance: f64,
}

/// Yaw / pitch / roll sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    #[serde(serialize_with = "compact_triple")]
    pub values: [f64; 3],
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub accuracy: i64,
}

/// Legacy GPS position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub timestamp: DateTime<Utc>,
    #[serde(serialize_with = "compact")]
    pub latitude: f64,
    #[serde(serialize_with = "compact")]
    pub longitude: f64,
}

/// Decode one feed unit (a frame, a line or a datagram).
pub fn decode<R: Record>(unit: &[u8]) -> Result<R, RelayError> {
    Ok(serde_json::from_slice(unit)?)
}

/// Encode a record into the data-channel wire form.
pub fn encode<R: Serialize + ?Sized>(record: &R) -> Result<String, RelayError> {
    Ok(serde_json::to_string(record)?)
}

/// Float rendered the way the feed's producers render it: plain decimals for
/// 1e-6 <= |x| < 1e21 (`0`, not `0.0`), exponent form with a signed exponent
/// outside that window.
struct Compact(f64);

impl Serialize for Compact {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        if !self.0.is_finite() {
            return s.serialize_f64(self.0);
        }
        RawValue::from_string(number_text(self.0))
            .map_err(S::Error::custom)?
            .serialize(s)
    }
}

fn number_text(x: f64) -> String {
    let abs = x.abs();
    if abs == 0.0 || (1e-6..1e21).contains(&abs) {
        // Display is shortest round-trip and never uses an exponent
        return x.to_string();
    }
    let sci = format!("{:e}", x);
    match sci.split_once('e') {
        Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
        _ => sci,
    }
}

fn compact<S: Serializer>(value: &f64, s: S) -> Result<S::Ok, S::Error> {
    Compact(*value).serialize(s)
}

fn compact_triple<S: Serializer>(values: &[f64; 3], s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(values.iter().map(|v| Compact(*v)))
}
