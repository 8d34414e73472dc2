use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub authoring_rps: u32,
    pub student_rps: u32,
    /// Applied when a quiz is created without an explicit pass threshold.
    pub default_pass_percentage: f64,
    pub sweep_interval_secs: u64,
    pub db_max_connections: u32,
    pub db_acquire_timeout_secs: u64,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        Ok(Self {
            server_address: get_env("SERVER_ADDRESS")?,
            database_url: get_env("DATABASE_URL")?,
            jwt_secret: get_env("JWT_SECRET")?,
            authoring_rps: get_env_parse("AUTHORING_RPS")?,
            student_rps: get_env_parse("STUDENT_RPS")?,
            default_pass_percentage: get_env_parse_or("DEFAULT_PASS_PERCENTAGE", 60.0)?,
            sweep_interval_secs: get_env_parse_or("SWEEP_INTERVAL_SECS", 60)?,
            db_max_connections: get_env_parse_or("DB_MAX_CONNECTIONS", 50)?,
            db_acquire_timeout_secs: get_env_parse_or("DB_ACQUIRE_TIMEOUT_SECS", 30)?,
        })
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_parse<T>(name: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = get_env(name)?;
    raw.parse()
        .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e)))
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> &'static Config {
    CONFIG
        .get()
        .expect("Configuration has not been initialized")
}
