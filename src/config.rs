//! Application configuration, loaded from defaults overlaid with
//! environment variables (see `.env` via dotenvy in main).

use ::config::{Config, Environment};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub environment: String,
    pub database_url: String,
    pub metrics_port: u16,

    /// Decimal places used when converting a market-by-base amount into
    /// counter volume.
    pub base_scale: u32,
    /// Maximum results persisted per batch.
    pub max_batch: usize,
    pub input_capacity: usize,
    pub output_capacity: usize,

    // Load generator (disabled by default).
    pub gen_enabled: bool,
    pub gen_count: u32,
    pub gen_seed: u64,
    pub gen_price: String,
    pub gen_amount: String,
    pub gen_fuzz_bps: i64,
    pub gen_cancel_prob_bps: i64,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config = Config::builder()
            .set_default("environment", "development")?
            .set_default("metrics_port", 9100)?
            .set_default("base_scale", 8)?
            .set_default("max_batch", 100)?
            .set_default("input_capacity", 1000)?
            .set_default("output_capacity", 1000)?
            .set_default("gen_enabled", false)?
            .set_default("gen_count", 1000)?
            .set_default("gen_seed", 42)?
            .set_default("gen_price", "100")?
            .set_default("gen_amount", "1")?
            .set_default("gen_fuzz_bps", 500)?
            .set_default("gen_cancel_prob_bps", 1000)?
            .add_source(Environment::default().try_parsing(true))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
