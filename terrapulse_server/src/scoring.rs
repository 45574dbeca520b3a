use serde_json::Value;
use terrapulse_common::SensorType;

/// Readings scoring at or above this are validated and earn points.
pub const VALIDATION_THRESHOLD: f64 = 0.7;

pub const MISSING_TIMESTAMP_PENALTY: f64 = 0.2;
pub const MISSING_SIGNATURE_PENALTY: f64 = 0.1;

/// Plausible (inclusive) range for a sensor type and the penalty applied
/// outside of it. Vibration and heat are not range checked.
pub fn plausible_range(sensor_type: SensorType) -> Option<(f64, f64, f64)> {
    match sensor_type {
        SensorType::Temperature => Some((-50.0, 80.0, 0.3)),
        SensorType::Humidity => Some((0.0, 100.0, 0.5)),
        SensorType::Co2 => Some((300.0, 5000.0, 0.3)),
        SensorType::Noise => Some((0.0, 140.0, 0.3)),
        SensorType::Vibration | SensorType::Heat => None,
    }
}

fn present(payload: &Value, field: &str) -> bool {
    match payload.get(field) {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().map_or(true, |n| n != 0.0),
        Some(_) => true,
    }
}

/// Data quality of a single reading in `[0, 1]`.
///
/// Starts at 1.0 and subtracts the range penalty when `value` is outside the
/// plausible range for `sensor_type`, then the metadata penalties when the
/// payload lacks a `timestamp` or a `deviceSignature`. A value that is not a
/// number (NaN) is never considered out of range.
pub fn quality_score(sensor_type: SensorType, value: f64, raw_payload: &Value) -> f64 {
    let mut score = 1.0;

    if let Some((min, max, penalty)) = plausible_range(sensor_type) {
        if value < min || value > max {
            score -= penalty;
        }
    }

    if !present(raw_payload, "timestamp") {
        score -= MISSING_TIMESTAMP_PENALTY;
    }
    if !present(raw_payload, "deviceSignature") {
        score -= MISSING_SIGNATURE_PENALTY;
    }

    f64::clamp(score, 0.0, 1.0)
}

pub fn is_validated(score: f64) -> bool {
    score >= VALIDATION_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn complete() -> Value {
        json!({ "timestamp": "2024-05-01T12:00:00Z", "deviceSignature": "3sig" })
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn in_range_with_metadata_is_perfect() {
        let payload = complete();
        assert_eq!(quality_score(SensorType::Temperature, 22.0, &payload), 1.0);
        assert_eq!(quality_score(SensorType::Temperature, -50.0, &payload), 1.0);
        assert_eq!(quality_score(SensorType::Temperature, 80.0, &payload), 1.0);
        assert_eq!(quality_score(SensorType::Humidity, 0.0, &payload), 1.0);
        assert_eq!(quality_score(SensorType::Co2, 5000.0, &payload), 1.0);
        assert_eq!(quality_score(SensorType::Noise, 140.0, &payload), 1.0);
        assert_eq!(quality_score(SensorType::Vibration, 1e9, &payload), 1.0);
        assert_eq!(quality_score(SensorType::Heat, -1e9, &payload), 1.0);
    }

    #[test]
    fn out_of_range_penalties() {
        let payload = complete();
        assert!(approx(quality_score(SensorType::Temperature, 80.5, &payload), 0.7));
        assert!(approx(quality_score(SensorType::Humidity, 101.0, &payload), 0.5));
        assert!(approx(quality_score(SensorType::Co2, 299.0, &payload), 0.7));
        assert!(approx(quality_score(SensorType::Noise, -1.0, &payload), 0.7));
    }

    #[test]
    fn missing_metadata_penalties() {
        let only_timestamp = json!({ "timestamp": "2024-05-01T12:00:00Z" });
        assert!(approx(quality_score(SensorType::Noise, 50.0, &only_timestamp), 0.9));

        let only_signature = json!({ "deviceSignature": "3sig" });
        assert!(approx(quality_score(SensorType::Noise, 50.0, &only_signature), 0.8));

        let empty_strings = json!({ "timestamp": "", "deviceSignature": "" });
        assert!(approx(quality_score(SensorType::Noise, 50.0, &empty_strings), 0.7));

        assert!(approx(quality_score(SensorType::Noise, 50.0, &json!("raw")), 0.7));
    }

    #[test]
    fn never_below_zero() {
        let score = quality_score(SensorType::Humidity, 500.0, &json!({}));
        assert!(approx(score, 0.2));
        for value in [-1e12, 1e12] {
            let score = quality_score(SensorType::Humidity, value, &Value::Null);
            assert!(score >= 0.0);
        }
    }

    #[test]
    fn validation_threshold_is_inclusive() {
        let payload = complete();
        let score = quality_score(SensorType::Temperature, 100.0, &payload);
        assert!(is_validated(score));

        let score = quality_score(SensorType::Temperature, 100.0, &json!({ "deviceSignature": "s" }));
        assert!(!is_validated(score));
    }
}
