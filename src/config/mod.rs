/// Application configuration module
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.myweblog.se/api_mobile.php";
pub const DEFAULT_TOKEN_URL: &str = "https://pymyweblogtoken.netlify.app/api/app_token";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub entry_path: PathBuf,
    pub client: ClientConfig,
    pub intervals: RefreshIntervals,
    pub setup_retry: Duration,
}

/// Remote logbook connection settings
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub api_url: String,
    pub token_url: String,
    pub app_secret: String,
    pub timeout: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshIntervals {
    pub objects: Duration,
    pub bookings: Duration,
}

impl Default for RefreshIntervals {
    fn default() -> Self {
        Self {
            objects: Duration::from_secs(3600),
            bookings: Duration::from_secs(900),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let bind_addr =
            env::var("MYWEBLOG_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

        let entry_path = env::var("MYWEBLOG_ENTRY_PATH")
            .unwrap_or_else(|_| "./data/entry.json".to_string())
            .into();

        let client = ClientConfig {
            api_url: env::var("MYWEBLOG_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            token_url: env::var("MYWEBLOG_TOKEN_URL")
                .unwrap_or_else(|_| DEFAULT_TOKEN_URL.to_string()),
            app_secret: env::var("MYWEBLOG_APP_SECRET").unwrap_or_default(),
            timeout: Duration::from_secs(env_u64("MYWEBLOG_TIMEOUT_SECONDS", 30)),
        };

        let intervals = RefreshIntervals {
            objects: Duration::from_secs(env_u64("OBJECTS_EVERY_SECONDS", 3600)), // 1h
            bookings: Duration::from_secs(env_u64("BOOKINGS_EVERY_SECONDS", 900)), // 15m
        };

        Self {
            bind_addr,
            entry_path,
            client,
            intervals,
            setup_retry: Duration::from_secs(env_u64("SETUP_RETRY_SECONDS", 60)),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}
