#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

#[cfg(feature = "full")]
pub mod web;

/// Kind of physical quantity a sensor measures.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(Display, EnumString, AsRefStr, EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SensorType {
    Temperature,
    Humidity,
    #[cfg_attr(feature = "serde", serde(rename = "CO2"))]
    #[strum(serialize = "CO2")]
    Co2,
    Noise,
    Vibration,
    Heat,
}

impl SensorType {
    /// Unit stored with a reading when the device does not report one.
    pub fn default_unit(&self) -> &'static str {
        match self {
            SensorType::Temperature | SensorType::Heat => "°C",
            SensorType::Humidity => "%",
            SensorType::Co2 => "ppm",
            SensorType::Noise => "dB",
            SensorType::Vibration => "mm/s",
        }
    }
}

/// Point categories kept per user by the reward program.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(Display, EnumString, AsRefStr, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum RewardBucket {
    Temp,
    Noise,
    Vibration,
    Heat,
}

impl RewardBucket {
    /// Humidity and CO2 have no bucket on the program side.
    pub fn for_sensor(sensor_type: SensorType) -> Option<Self> {
        match sensor_type {
            SensorType::Temperature => Some(RewardBucket::Temp),
            SensorType::Noise => Some(RewardBucket::Noise),
            SensorType::Vibration => Some(RewardBucket::Vibration),
            SensorType::Heat => Some(RewardBucket::Heat),
            SensorType::Humidity | SensorType::Co2 => None,
        }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[derive(Display, EnumString, AsRefStr, EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    #[default]
    Pending,
    Active,
    Inactive,
    Suspended,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[derive(Display, EnumString, AsRefStr, EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ClaimStatus {
    /// Claims in these states hold on to the points they spend.
    pub const COMMITTED: [ClaimStatus; 3] = [
        ClaimStatus::Pending,
        ClaimStatus::Processing,
        ClaimStatus::Completed,
    ];

    pub fn is_committed(&self) -> bool {
        Self::COMMITTED.contains(self)
    }
}
