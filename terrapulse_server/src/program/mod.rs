//! The on-chain reward program as seen from the server.
//!
//! The program keeps one admin-owned configuration with a rate per bucket and
//! one account per user holding a counter per bucket. The admin credits
//! counters; users claim, which mints `Σ counter × rate` whole tokens and
//! zeroes the counters.

mod simulated;

pub use simulated::SimulatedProgram;

use async_trait::async_trait;
use serde::Serialize;
use terrapulse_common::RewardBucket;

/// Decimals of the reward mint.
pub const REWARD_DECIMALS: u32 = 6;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProgramError {
    #[error("program is not initialized")]
    NotInitialized,
    #[error("program is already initialized")]
    AlreadyInitialized,
    #[error("signer {0} is not the program admin")]
    Unauthorized(String),
    #[error("user account {0} does not exist")]
    UnknownUser(String),
    #[error("user account {0} already exists")]
    UserExists(String),
    #[error("arithmetic overflow")]
    Overflow,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Token rate per point, per bucket.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RewardRates {
    pub temp: u8,
    pub noise: u8,
    pub vibration: u8,
    pub heat: u8,
}

impl RewardRates {
    pub fn rate(&self, bucket: RewardBucket) -> u8 {
        match bucket {
            RewardBucket::Temp => self.temp,
            RewardBucket::Noise => self.noise,
            RewardBucket::Vibration => self.vibration,
            RewardBucket::Heat => self.heat,
        }
    }
}

impl Default for RewardRates {
    fn default() -> Self {
        Self { temp: 1, noise: 1, vibration: 1, heat: 1 }
    }
}

/// A user's per-bucket point counters.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserPoints {
    pub user: String,
    pub temp_points: u32,
    pub noise_points: u32,
    pub vibration_points: u32,
    pub heat_points: u32,
}

impl UserPoints {
    pub fn new(user: &str) -> Self {
        Self {
            user: user.to_string(),
            temp_points: 0,
            noise_points: 0,
            vibration_points: 0,
            heat_points: 0,
        }
    }

    pub fn bucket_mut(&mut self, bucket: RewardBucket) -> &mut u32 {
        match bucket {
            RewardBucket::Temp => &mut self.temp_points,
            RewardBucket::Noise => &mut self.noise_points,
            RewardBucket::Vibration => &mut self.vibration_points,
            RewardBucket::Heat => &mut self.heat_points,
        }
    }

    pub fn bucket(&self, bucket: RewardBucket) -> u32 {
        match bucket {
            RewardBucket::Temp => self.temp_points,
            RewardBucket::Noise => self.noise_points,
            RewardBucket::Vibration => self.vibration_points,
            RewardBucket::Heat => self.heat_points,
        }
    }
}

#[async_trait]
pub trait RewardProgram: Send + Sync {
    async fn initialize(&self, admin: &str, rates: RewardRates) -> Result<(), ProgramError>;

    async fn initialize_user(&self, admin: &str, user: &str) -> Result<(), ProgramError>;

    /// Adds `amount` to the user's `bucket` counter.
    async fn update_points(
        &self,
        admin: &str,
        user: &str,
        bucket: RewardBucket,
        amount: u32,
    ) -> Result<(), ProgramError>;

    /// Mints the user's accumulated reward and zeroes their counters.
    /// Returns the minted amount in base units.
    async fn claim(&self, user: &str) -> Result<u64, ProgramError>;

    async fn user_account(&self, user: &str) -> Result<Option<UserPoints>, ProgramError>;
}
