use crate::SensorType;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

/// A reading as submitted by a registered device.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadingRequest {
    pub device_id: Uuid,
    pub sensor_type: SensorType,
    pub value: f64,
    pub raw_payload: Value,

    #[serde(default)]
    pub sensor_id: Option<Uuid>,
    #[serde(default)]
    pub value_unit: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub recorded_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub ipfs_cid: Option<String>,
    #[serde(default)]
    pub onchain_proof: Option<String>,
}

/// Simplified submission used by the ESP32 firmware, keyed by the user's
/// external identity rather than a registered device.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuickReadingRequest {
    pub privy_id: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
}

impl QuickReadingRequest {
    pub fn values(&self) -> Vec<(SensorType, f64)> {
        let mut values = Vec::with_capacity(2);
        if let Some(t) = self.temperature {
            values.push((SensorType::Temperature, t));
        }
        if let Some(h) = self.humidity {
            values.push((SensorType::Humidity, h));
        }
        values
    }
}

/// Payload recorded for readings that did not arrive with one of their own.
pub fn server_payload(sensor_type: SensorType, value: f64, now: OffsetDateTime) -> Value {
    let timestamp = now.format(&Rfc3339).unwrap_or_default();
    let mut payload = json!({
        "timestamp": timestamp,
        "source": "api",
    });
    payload[sensor_type.as_ref().to_lowercase()] = json!(value);
    payload
}
