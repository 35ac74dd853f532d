//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::Money;
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use tracing::warn;

const DEFAULT_CONFIG_PATH: &str = "config/dev.toml";

/// Ceiling used when `payment.max_amount` is not a positive number
pub const DEFAULT_MAX_AMOUNT: Money = Money::from_units(10_000);

/// Serial parity as written in the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    None,
    Even,
    Odd,
}

impl From<SerialParity> for tokio_serial::Parity {
    fn from(parity: SerialParity) -> Self {
        match parity {
            SerialParity::None => tokio_serial::Parity::None,
            SerialParity::Even => tokio_serial::Parity::Even,
            SerialParity::Odd => tokio_serial::Parity::Odd,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique site identifier, used as the metrics label
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "cash-gateway".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind_address: String,
    pub port: u16,
    /// Prefix for the payment endpoints (e.g. "/api")
    pub base_path: String,
    /// How long `GET /efectivo/estado` waits for an event
    pub status_timeout_ms: u64,
    /// How long an amount request waits for the tube status reply
    pub tube_status_timeout_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 3000,
            base_path: "/api".to_string(),
            status_timeout_ms: 120_000,
            tube_status_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BillAcceptorConfig {
    pub device: String,
    pub baud: u32,
    pub parity: SerialParity,
    pub poll_interval_ms: u64,
    pub chunk_len: usize,
}

impl Default for BillAcceptorConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyS1".to_string(),
            baud: 9600,
            parity: SerialParity::Even,
            poll_interval_ms: 250,
            chunk_len: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoinChangerConfig {
    pub device: String,
    pub baud: u32,
    pub parity: SerialParity,
    pub poll_interval_ms: u64,
    pub chunk_len: usize,
    /// Frame buffer bound in bytes
    pub buffer_limit: usize,
    /// Bytes kept when the bound is exceeded
    pub buffer_keep: usize,
}

impl Default for CoinChangerConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyS2".to_string(),
            baud: 115_200,
            parity: SerialParity::None,
            poll_interval_ms: 500,
            chunk_len: 24,
            buffer_limit: 50,
            buffer_keep: 25,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    pub debounce_ms: u64,
    pub settle_ms: u64,
    /// Pause between `BilleteroEnEspera` and the tier command
    pub hold_delay_ms: u64,
    pub dispense_delay_ms: u64,
    /// Pause between the bill acceptor start-up commands
    pub startup_step_ms: u64,
    /// Tube total needed before coins are accepted
    pub min_change_float: f64,
    /// Largest amount accepted by `/efectivo/monto` and `/efectivo/pagar`
    pub max_amount: f64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 200,
            settle_ms: 1500,
            hold_delay_ms: 50,
            dispense_delay_ms: 500,
            startup_step_ms: 100,
            min_change_float: 4.90,
            max_amount: 10_000.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub bill_acceptor: BillAcceptorConfig,
    #[serde(default)]
    pub coin_changer: CoinChangerConfig,
    #[serde(default)]
    pub payment: PaymentConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    http_bind_address: String,
    http_port: u16,
    http_base_path: String,
    status_timeout_ms: u64,
    tube_status_timeout_ms: u64,
    bill_device: String,
    bill_baud: u32,
    bill_parity: SerialParity,
    bill_poll_interval_ms: u64,
    bill_chunk_len: usize,
    coin_device: String,
    coin_baud: u32,
    coin_parity: SerialParity,
    coin_poll_interval_ms: u64,
    coin_chunk_len: usize,
    coin_buffer_limit: usize,
    coin_buffer_keep: usize,
    debounce_ms: u64,
    settle_ms: u64,
    hold_delay_ms: u64,
    dispense_delay_ms: u64,
    startup_step_ms: u64,
    min_change_float: Money,
    max_amount: Money,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        let TomlConfig { site, http, bill_acceptor, coin_changer, payment, metrics } = toml_config;

        // A non-positive float disables the guard
        let min_change_float = Money::from_decimal(payment.min_change_float).unwrap_or(Money::ZERO);
        let max_amount = Money::from_decimal(payment.max_amount).unwrap_or(DEFAULT_MAX_AMOUNT);

        Self {
            site_id: site.id,
            http_bind_address: http.bind_address,
            http_port: http.port,
            http_base_path: normalize_base_path(&http.base_path),
            status_timeout_ms: http.status_timeout_ms,
            tube_status_timeout_ms: http.tube_status_timeout_ms,
            bill_device: bill_acceptor.device,
            bill_baud: bill_acceptor.baud,
            bill_parity: bill_acceptor.parity,
            bill_poll_interval_ms: bill_acceptor.poll_interval_ms,
            bill_chunk_len: bill_acceptor.chunk_len,
            coin_device: coin_changer.device,
            coin_baud: coin_changer.baud,
            coin_parity: coin_changer.parity,
            coin_poll_interval_ms: coin_changer.poll_interval_ms,
            coin_chunk_len: coin_changer.chunk_len,
            coin_buffer_limit: coin_changer.buffer_limit,
            coin_buffer_keep: coin_changer.buffer_keep,
            debounce_ms: payment.debounce_ms,
            settle_ms: payment.settle_ms,
            hold_delay_ms: payment.hold_delay_ms,
            dispense_delay_ms: payment.dispense_delay_ms,
            startup_step_ms: payment.startup_step_ms,
            min_change_float,
            max_amount,
            metrics_interval_secs: metrics.interval_secs,
            config_file,
        }
    }

    /// Config path when none is given on the command line
    pub fn default_path() -> String {
        env::var("CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn http_bind_address(&self) -> &str {
        &self.http_bind_address
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn http_base_path(&self) -> &str {
        &self.http_base_path
    }

    pub fn status_timeout_ms(&self) -> u64 {
        self.status_timeout_ms
    }

    pub fn tube_status_timeout_ms(&self) -> u64 {
        self.tube_status_timeout_ms
    }

    pub fn bill_device(&self) -> &str {
        &self.bill_device
    }

    pub fn bill_baud(&self) -> u32 {
        self.bill_baud
    }

    pub fn bill_parity(&self) -> SerialParity {
        self.bill_parity
    }

    pub fn bill_poll_interval_ms(&self) -> u64 {
        self.bill_poll_interval_ms
    }

    pub fn bill_chunk_len(&self) -> usize {
        self.bill_chunk_len
    }

    pub fn coin_device(&self) -> &str {
        &self.coin_device
    }

    pub fn coin_baud(&self) -> u32 {
        self.coin_baud
    }

    pub fn coin_parity(&self) -> SerialParity {
        self.coin_parity
    }

    pub fn coin_poll_interval_ms(&self) -> u64 {
        self.coin_poll_interval_ms
    }

    pub fn coin_chunk_len(&self) -> usize {
        self.coin_chunk_len
    }

    pub fn coin_buffer_limit(&self) -> usize {
        self.coin_buffer_limit
    }

    pub fn coin_buffer_keep(&self) -> usize {
        self.coin_buffer_keep
    }

    pub fn debounce_ms(&self) -> u64 {
        self.debounce_ms
    }

    pub fn settle_ms(&self) -> u64 {
        self.settle_ms
    }

    pub fn hold_delay_ms(&self) -> u64 {
        self.hold_delay_ms
    }

    pub fn dispense_delay_ms(&self) -> u64 {
        self.dispense_delay_ms
    }

    pub fn startup_step_ms(&self) -> u64 {
        self.startup_step_ms
    }

    pub fn min_change_float(&self) -> Money {
        self.min_change_float
    }

    pub fn max_amount(&self) -> Money {
        self.max_amount
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the change float guard
    pub fn with_min_change_float(mut self, amount: Money) -> Self {
        self.min_change_float = amount;
        self
    }

    /// Builder method for tests to set the amount ceiling
    pub fn with_max_amount(mut self, amount: Money) -> Self {
        self.max_amount = amount;
        self
    }

    /// Builder method for tests to set the status wait
    pub fn with_status_timeout_ms(mut self, ms: u64) -> Self {
        self.status_timeout_ms = ms;
        self
    }
}

/// Leading slash, no trailing slash; "" and "/" both mean no prefix
fn normalize_base_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.http_port(), 3000);
        assert_eq!(config.http_base_path(), "/api");
        assert_eq!(config.status_timeout_ms(), 120_000);
        assert_eq!(config.bill_device(), "/dev/ttyS1");
        assert_eq!(config.bill_baud(), 9600);
        assert_eq!(config.bill_parity(), SerialParity::Even);
        assert_eq!(config.bill_poll_interval_ms(), 250);
        assert_eq!(config.coin_device(), "/dev/ttyS2");
        assert_eq!(config.coin_baud(), 115_200);
        assert_eq!(config.coin_parity(), SerialParity::None);
        assert_eq!(config.coin_poll_interval_ms(), 500);
        assert_eq!(config.coin_chunk_len(), 24);
        assert_eq!(config.coin_buffer_limit(), 50);
        assert_eq!(config.coin_buffer_keep(), 25);
        assert_eq!(config.debounce_ms(), 200);
        assert_eq!(config.settle_ms(), 1500);
        assert_eq!(config.min_change_float(), Money::from_cents(490));
        assert_eq!(config.max_amount(), Money::from_units(10_000));
        assert_eq!(config.config_file(), "default");
    }

    #[test]
    fn test_normalize_base_path() {
        assert_eq!(normalize_base_path("/api"), "/api");
        assert_eq!(normalize_base_path("api/"), "/api");
        assert_eq!(normalize_base_path("/"), "");
        assert_eq!(normalize_base_path(""), "");
        assert_eq!(normalize_base_path("/v1/cash/"), "/v1/cash");
    }

    #[test]
    fn test_parity_conversion() {
        assert_eq!(tokio_serial::Parity::from(SerialParity::Even), tokio_serial::Parity::Even);
        assert_eq!(tokio_serial::Parity::from(SerialParity::None), tokio_serial::Parity::None);
    }

    #[test]
    fn test_zero_change_float_disables_guard() {
        let toml_config: TomlConfig = toml::from_str("[payment]\nmin_change_float = 0.0\n").unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());
        assert_eq!(config.min_change_float(), Money::ZERO);
        // Other payment fields keep their defaults
        assert_eq!(config.settle_ms(), 1500);
    }

    #[test]
    fn test_non_positive_max_amount_keeps_default() {
        let toml_config: TomlConfig = toml::from_str("[payment]\nmax_amount = -1.0\n").unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());
        assert_eq!(config.max_amount(), DEFAULT_MAX_AMOUNT);

        let toml_config: TomlConfig = toml::from_str("[payment]\nmax_amount = 250.5\n").unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());
        assert_eq!(config.max_amount(), Money::from_cents(25_050));
    }
}
