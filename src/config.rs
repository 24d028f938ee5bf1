use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub identity: IdentityConfig,
    pub custody: CustodyConfig,
    pub prizes: PrizeConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub rust_log: String,
}

/// Shared secrets for the scheduled trigger and admin calls
#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub cron_secret: String,
    pub admin_api_key: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IdentityConfig {
    pub api_url: String,
    pub api_key: String,
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CustodyConfig {
    pub api_url: String,
    pub api_key: String,
    pub source_wallet: String,
    pub token_address: String,
    pub chain: String,
    pub token_decimals: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PrizeConfig {
    pub daily_base: Decimal,
    pub weekly_base: Decimal,
    pub archive_depth: usize,
}

/// Largest exponent a `Decimal` smallest-unit conversion can carry
const MAX_TOKEN_DECIMALS: u32 = 18;

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")?;
        let redis_url = env::var("REDIS_URL")?;
        let port: u16 = env::var("PORT")?.parse()?;
        let host = env::var("HOST")?;
        let rust_log = var_or("RUST_LOG", "tapblitz_backend=info,actix_web=info");
        let cron_secret = env::var("CRON_SECRET")?;
        let admin_api_key = env::var("ADMIN_API_KEY")?;
        let neynar_api_url = var_or("NEYNAR_API_URL", "https://api.neynar.com");
        let neynar_api_key = env::var("NEYNAR_API_KEY")?;
        let cache_ttl_secs: u64 = var_or("IDENTITY_CACHE_TTL_SECS", "3600").parse()?;
        let custody_api_url = env::var("CUSTODY_API_URL")?;
        let custody_api_key = env::var("CUSTODY_API_KEY")?;
        let source_wallet = env::var("PAYOUT_SOURCE_WALLET")?;
        let token_address = env::var("PAYOUT_TOKEN_ADDRESS")?;
        let chain = var_or("PAYOUT_CHAIN", "base");
        let token_decimals: u32 = var_or("PAYOUT_TOKEN_DECIMALS", "6").parse()?;
        let daily_base = Decimal::from_str(&var_or("DAILY_BASE_PRIZE", "0"))?;
        let weekly_base = Decimal::from_str(&var_or("WEEKLY_BASE_PRIZE", "0"))?;
        let archive_depth: usize = var_or("LEADERBOARD_ARCHIVE_DEPTH", "100").parse()?;

        if cron_secret.is_empty() || admin_api_key.is_empty() {
            anyhow::bail!("CRON_SECRET and ADMIN_API_KEY must not be empty");
        }
        if token_decimals > MAX_TOKEN_DECIMALS {
            anyhow::bail!(
                "PAYOUT_TOKEN_DECIMALS must be at most {}, got {}",
                MAX_TOKEN_DECIMALS,
                token_decimals
            );
        }
        if daily_base.is_sign_negative() || weekly_base.is_sign_negative() {
            anyhow::bail!("Base prizes must not be negative");
        }

        Ok(Config {
            database: DatabaseConfig { url: database_url },
            redis: RedisConfig { url: redis_url },
            server: ServerConfig { port, host, rust_log },
            auth: AuthConfig {
                cron_secret,
                admin_api_key,
            },
            identity: IdentityConfig {
                api_url: neynar_api_url,
                api_key: neynar_api_key,
                cache_ttl_secs,
            },
            custody: CustodyConfig {
                api_url: custody_api_url,
                api_key: custody_api_key,
                source_wallet,
                token_address,
                chain,
                token_decimals,
            },
            prizes: PrizeConfig {
                daily_base,
                weekly_base,
                archive_depth,
            },
        })
    }
}
