use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use crate::program::RewardRates;

/// TerraPulse sensor rewards server.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub struct Args {
    /// Postgres connection string.
    #[arg(long, env = "DATABASE_URL", required_unless_present = "in_memory")]
    pub database_url: Option<String>,

    /// Keep everything in memory instead of Postgres. Data is lost on exit.
    #[arg(long)]
    pub in_memory: bool,

    #[arg(long, env = "TERRAPULSE_BIND", default_value = "0.0.0.0:3000")]
    pub bind: SocketAddr,

    /// Admin signer of the reward program.
    #[arg(long, env = "TERRAPULSE_ADMIN_KEY", default_value = "terrapulse-admin")]
    pub admin_key: String,

    /// Run the ledger sync every N seconds. Disabled when unset.
    #[arg(long, env = "TERRAPULSE_SYNC_INTERVAL_SECS")]
    pub sync_interval_secs: Option<u64>,

    #[arg(long, default_value_t = 1)]
    pub reward_temp: u8,
    #[arg(long, default_value_t = 1)]
    pub reward_noise: u8,
    #[arg(long, default_value_t = 1)]
    pub reward_vibration: u8,
    #[arg(long, default_value_t = 1)]
    pub reward_heat: u8,
}

impl Args {
    pub fn rates(&self) -> RewardRates {
        RewardRates {
            temp: self.reward_temp,
            noise: self.reward_noise,
            vibration: self.reward_vibration,
            heat: self.reward_heat,
        }
    }

    pub fn sync_interval(&self) -> Option<Duration> {
        self.sync_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}
