use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::settlement::scheduler::SettlementFrequency;

/// Which processor rail moves the settled funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutRail {
    /// Transfer to a connected destination account
    Transfer,
    /// Payout from the processor balance to the external bank account
    Payout,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,

    // Processor credentials / destination. Missing values are fatal at
    // startup: a settlement run without them could never move funds.
    pub processor_api_url: String,
    pub processor_secret_key: String,
    pub processor_destination: String,
    pub payout_rail: PayoutRail,

    pub settlement_currency: String,
    pub minimum_transfer: Decimal,

    pub schedule_frequency: SettlementFrequency,
    pub schedule_execution_hour: u32,
    pub schedule_enabled: bool,

    pub repair_retry_ceiling: i32,
    pub repair_min_age_minutes: i64,
    pub repair_max_age_hours: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let env = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;

        // Required: without processor credentials and a destination there is
        // nothing this service can do.
        let processor_secret_key = env.get::<String>("processor_secret_key")?;
        let processor_destination = env.get::<String>("processor_destination")?;

        Ok(Self {
            database_url: env
                .get::<String>("database_url")
                .unwrap_or_else(|_| "postgresql://localhost/settlement".to_string()),
            bind_address: env
                .get::<String>("bind_address")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            processor_api_url: env
                .get::<String>("processor_api_url")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            processor_secret_key,
            processor_destination,
            payout_rail: match env
                .get::<String>("payout_rail")
                .unwrap_or_else(|_| "transfer".to_string())
                .as_str()
            {
                "payout" => PayoutRail::Payout,
                _ => PayoutRail::Transfer,
            },
            settlement_currency: env
                .get::<String>("settlement_currency")
                .unwrap_or_else(|_| "usd".to_string()),
            minimum_transfer: env
                .get::<String>("minimum_transfer")
                .ok()
                .and_then(|raw| Decimal::from_str(&raw).ok())
                .unwrap_or_else(|| Decimal::new(500, 2)),
            schedule_frequency: match env
                .get::<String>("settlement_frequency")
                .unwrap_or_else(|_| "daily".to_string())
                .as_str()
            {
                "hourly" => SettlementFrequency::Hourly,
                "weekly" => SettlementFrequency::Weekly,
                _ => SettlementFrequency::Daily,
            },
            schedule_execution_hour: env
                .get::<String>("settlement_execution_hour")
                .ok()
                .and_then(|raw| raw.parse::<u32>().ok())
                .filter(|h| *h < 24)
                .unwrap_or(2),
            schedule_enabled: env
                .get::<String>("settlement_schedule_enabled")
                .map(|raw| raw != "false" && raw != "0")
                .unwrap_or(true),
            repair_retry_ceiling: env
                .get::<String>("repair_retry_ceiling")
                .ok()
                .and_then(|raw| raw.parse::<i32>().ok())
                .unwrap_or(5),
            repair_min_age_minutes: env
                .get::<String>("repair_min_age_minutes")
                .ok()
                .and_then(|raw| raw.parse::<i64>().ok())
                .unwrap_or(30),
            repair_max_age_hours: env
                .get::<String>("repair_max_age_hours")
                .ok()
                .and_then(|raw| raw.parse::<i64>().ok())
                .unwrap_or(168),
        })
    }
}
