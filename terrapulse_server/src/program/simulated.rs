use std::collections::HashMap;

use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;
use strum::IntoEnumIterator;
use terrapulse_common::RewardBucket;

use super::{ProgramError, RewardProgram, RewardRates, UserPoints, REWARD_DECIMALS};

#[derive(Debug, Clone)]
struct Config {
    admin: String,
    rates: RewardRates,
}

#[derive(Debug, Default)]
struct State {
    config: Option<Config>,
    users: HashMap<String, UserPoints>,
    /// Base units minted per user, across all claims.
    minted: HashMap<String, u64>,
}

/// In-memory reward program with the same checks as the deployed one.
#[derive(Debug, Default)]
pub struct SimulatedProgram {
    state: Mutex<State>,
}

impl SimulatedProgram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total base units minted to `user` so far.
    pub fn minted(&self, user: &str) -> u64 {
        self.state.lock().minted.get(user).copied().unwrap_or(0)
    }
}

fn require_admin(state: &State, admin: &str) -> Result<(), ProgramError> {
    let config = state.config.as_ref().ok_or(ProgramError::NotInitialized)?;
    if config.admin != admin {
        return Err(ProgramError::Unauthorized(admin.to_string()));
    }
    Ok(())
}

#[async_trait]
impl RewardProgram for SimulatedProgram {
    async fn initialize(&self, admin: &str, rates: RewardRates) -> Result<(), ProgramError> {
        let mut state = self.state.lock();
        if state.config.is_some() {
            return Err(ProgramError::AlreadyInitialized);
        }
        state.config = Some(Config { admin: admin.to_string(), rates });
        Ok(())
    }

    async fn initialize_user(&self, admin: &str, user: &str) -> Result<(), ProgramError> {
        let mut state = self.state.lock();
        require_admin(&state, admin)?;
        if state.users.contains_key(user) {
            return Err(ProgramError::UserExists(user.to_string()));
        }
        state.users.insert(user.to_string(), UserPoints::new(user));
        debug!("Initialized reward account for {user}");
        Ok(())
    }

    async fn update_points(
        &self,
        admin: &str,
        user: &str,
        bucket: RewardBucket,
        amount: u32,
    ) -> Result<(), ProgramError> {
        let mut state = self.state.lock();
        require_admin(&state, admin)?;
        let account = state
            .users
            .get_mut(user)
            .ok_or_else(|| ProgramError::UnknownUser(user.to_string()))?;
        let counter = account.bucket_mut(bucket);
        *counter = counter.checked_add(amount).ok_or(ProgramError::Overflow)?;
        Ok(())
    }

    async fn claim(&self, user: &str) -> Result<u64, ProgramError> {
        let mut state = self.state.lock();
        let rates = state.config.as_ref().ok_or(ProgramError::NotInitialized)?.rates;
        let account = state
            .users
            .get_mut(user)
            .ok_or_else(|| ProgramError::UnknownUser(user.to_string()))?;

        let mut total: u32 = 0;
        for bucket in RewardBucket::iter() {
            let earned = account
                .bucket(bucket)
                .checked_mul(rates.rate(bucket) as u32)
                .ok_or(ProgramError::Overflow)?;
            total = total.checked_add(earned).ok_or(ProgramError::Overflow)?;
        }
        let minted = total as u64 * 10_u64.pow(REWARD_DECIMALS);

        for bucket in RewardBucket::iter() {
            *account.bucket_mut(bucket) = 0;
        }
        *state.minted.entry(user.to_string()).or_default() += minted;
        Ok(minted)
    }

    async fn user_account(&self, user: &str) -> Result<Option<UserPoints>, ProgramError> {
        Ok(self.state.lock().users.get(user).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADMIN: &str = "Admin1111111111111111111111111111111111111";
    const USER: &str = "User11111111111111111111111111111111111111";

    async fn initialized() -> SimulatedProgram {
        let program = SimulatedProgram::new();
        let rates = RewardRates { temp: 2, noise: 1, vibration: 3, heat: 1 };
        program.initialize(ADMIN, rates).await.unwrap();
        program.initialize_user(ADMIN, USER).await.unwrap();
        program
    }

    #[tokio::test]
    async fn only_admin_may_credit() {
        let program = initialized().await;
        let err = program
            .update_points("Mallory", USER, RewardBucket::Temp, 5)
            .await
            .unwrap_err();
        assert_eq!(err, ProgramError::Unauthorized("Mallory".into()));

        let err = program.initialize_user("Mallory", "Other").await.unwrap_err();
        assert!(matches!(err, ProgramError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn unknown_user_cannot_be_credited() {
        let program = initialized().await;
        let err = program
            .update_points(ADMIN, "Nobody", RewardBucket::Noise, 1)
            .await
            .unwrap_err();
        assert_eq!(err, ProgramError::UnknownUser("Nobody".into()));
        assert!(program.user_account("Nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn counters_use_checked_arithmetic() {
        let program = initialized().await;
        program.update_points(ADMIN, USER, RewardBucket::Heat, u32::MAX).await.unwrap();
        let err = program.update_points(ADMIN, USER, RewardBucket::Heat, 1).await.unwrap_err();
        assert_eq!(err, ProgramError::Overflow);
        let account = program.user_account(USER).await.unwrap().unwrap();
        assert_eq!(account.heat_points, u32::MAX);
    }

    #[tokio::test]
    async fn claim_mints_weighted_points_and_resets() {
        let program = initialized().await;
        program.update_points(ADMIN, USER, RewardBucket::Temp, 10).await.unwrap();
        program.update_points(ADMIN, USER, RewardBucket::Vibration, 4).await.unwrap();
        program.update_points(ADMIN, USER, RewardBucket::Temp, 5).await.unwrap();

        let minted = program.claim(USER).await.unwrap();
        assert_eq!(minted, (15 * 2 + 4 * 3) * 1_000_000);
        assert_eq!(program.minted(USER), minted);

        let account = program.user_account(USER).await.unwrap().unwrap();
        assert_eq!(account, UserPoints::new(USER));
        assert_eq!(program.claim(USER).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn initialize_once() {
        let program = initialized().await;
        let err = program.initialize(ADMIN, RewardRates::default()).await.unwrap_err();
        assert_eq!(err, ProgramError::AlreadyInitialized);
        let err = program.initialize_user(ADMIN, USER).await.unwrap_err();
        assert_eq!(err, ProgramError::UserExists(USER.into()));
    }
}
