use std::env;
use std::str::FromStr;
use std::time::Duration;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::SecurityHeaders;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3001";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub max_connections: u32,
    pub upload_dir: String,
    pub webhook_timeout: Duration,
    pub email_relay_url: Option<String>,
    pub store_backend: StoreBackend,
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Config: invalid {}='{}', using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        let store_backend = match env::var("STORE_BACKEND").as_deref() {
            Ok("memory") => StoreBackend::Memory,
            _ => StoreBackend::Postgres,
        };

        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/eventdesk".to_string()),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
            max_connections: parsed_or("DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS),
            upload_dir: env::var("UPLOAD_DIR").unwrap_or_else(|_| DEFAULT_UPLOAD_DIR.to_string()),
            webhook_timeout: Duration::from_secs(parsed_or(
                "WEBHOOK_TIMEOUT_SECS",
                DEFAULT_WEBHOOK_TIMEOUT_SECS,
            )),
            email_relay_url: env::var("EMAIL_RELAY_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            store_backend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unparsable_values_fall_back_to_defaults() {
        std::env::set_var("EVENTDESK_TEST_NUMBER", "many");
        assert_eq!(parsed_or("EVENTDESK_TEST_NUMBER", 7u32), 7);
        std::env::set_var("EVENTDESK_TEST_NUMBER", " 12 ");
        assert_eq!(parsed_or("EVENTDESK_TEST_NUMBER", 7u32), 12);
        assert_eq!(parsed_or("EVENTDESK_TEST_UNSET", 3u64), 3);
    }
}
