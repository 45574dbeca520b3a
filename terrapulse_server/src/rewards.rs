use terrapulse_common::SensorType;

use crate::models::RewardIndex;
use crate::store::{RewardIndexSource, StoreError};

/// Points earned by a reading of `sensor_type` with quality `q` under `index`.
///
/// `base × q × boost × (dataQuality × q)`, where a missing or zero boost and
/// a missing or zero data-quality multiplier count as 1. Rounded to cents.
/// No index means no points.
pub fn calculate_points(index: Option<&RewardIndex>, sensor_type: SensorType, q: f64) -> f64 {
    let Some(index) = index else {
        return 0.0;
    };

    let boost = match index.sensor_boosts.get(&sensor_type) {
        Some(&boost) if boost != 0.0 => boost,
        _ => 1.0,
    };
    let quality_multiplier = match index.multipliers.data_quality {
        Some(dq) if dq != 0.0 => dq * q,
        _ => 1.0,
    };

    round_cents(index.base_points * q * boost * quality_multiplier)
}

/// Looks up the active index and scores with it.
pub async fn points_for<S: RewardIndexSource + ?Sized>(
    source: &S,
    sensor_type: SensorType,
    q: f64,
) -> Result<f64, StoreError> {
    let index = source.active_reward_index().await?;
    Ok(calculate_points(index.as_ref(), sensor_type, q))
}

/// Ledger amounts are kept to two decimals.
pub(crate) fn round_cents(points: f64) -> f64 {
    (points * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RewardMultipliers;
    use crate::store::FixedRewardIndex;
    use std::collections::BTreeMap;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn index(base: f64, boosts: &[(SensorType, f64)], data_quality: Option<f64>) -> RewardIndex {
        RewardIndex {
            id: Uuid::new_v4(),
            base_points: base,
            sensor_boosts: boosts.iter().copied().collect::<BTreeMap<_, _>>(),
            multipliers: RewardMultipliers { data_quality },
            active: true,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn temperature_example() {
        let index = index(10.0, &[(SensorType::Temperature, 1.2)], Some(1.0));
        assert_eq!(calculate_points(Some(&index), SensorType::Temperature, 1.0), 12.0);
    }

    #[test]
    fn no_index_no_points() {
        assert_eq!(calculate_points(None, SensorType::Noise, 1.0), 0.0);
    }

    #[test]
    fn zero_or_missing_multipliers_count_as_one() {
        let index = index(10.0, &[(SensorType::Noise, 0.0)], Some(0.0));
        assert_eq!(calculate_points(Some(&index), SensorType::Noise, 0.8), 8.0);
        assert_eq!(calculate_points(Some(&index), SensorType::Heat, 0.8), 8.0);
    }

    #[test]
    fn linear_in_boost() {
        let single = index(7.0, &[(SensorType::Heat, 1.5)], None);
        let double = index(7.0, &[(SensorType::Heat, 3.0)], None);
        let a = calculate_points(Some(&single), SensorType::Heat, 0.9);
        let b = calculate_points(Some(&double), SensorType::Heat, 0.9);
        assert!((b - 2.0 * a).abs() < 0.011);
    }

    #[test]
    fn linear_in_quality_without_data_quality_multiplier() {
        let index = index(20.0, &[], None);
        assert_eq!(calculate_points(Some(&index), SensorType::Vibration, 0.5), 10.0);
        assert_eq!(calculate_points(Some(&index), SensorType::Vibration, 1.0), 20.0);
    }

    #[test]
    fn data_quality_applies_quality_twice() {
        let index = index(10.0, &[], Some(2.0));
        // 10 × 0.8 × (2 × 0.8)
        assert_eq!(calculate_points(Some(&index), SensorType::Temperature, 0.8), 12.8);
    }

    #[test]
    fn rounds_to_two_decimals() {
        let index = index(1.0, &[], None);
        assert_eq!(calculate_points(Some(&index), SensorType::Temperature, 0.7777), 0.78);
    }

    #[tokio::test]
    async fn points_for_uses_injected_index() {
        let source = FixedRewardIndex(Some(index(10.0, &[(SensorType::Temperature, 1.2)], Some(1.0))));
        let points = points_for(&source, SensorType::Temperature, 1.0).await.unwrap();
        assert_eq!(points, 12.0);

        let empty = FixedRewardIndex(None);
        assert_eq!(points_for(&empty, SensorType::Temperature, 1.0).await.unwrap(), 0.0);
    }
}
