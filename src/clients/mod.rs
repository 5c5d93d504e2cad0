/// Remote logbook client module
use crate::config::ClientConfig;
use crate::domain::Credentials;
use crate::errors::{ClientError, ClientResult};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

pub const API_VERSION: &str = "2.0.3";

/// Days of bookings requested, starting today
const BOOKINGS_WINDOW_DAYS: u64 = 14;

/// Opens authenticated sessions against the logbook service
#[async_trait]
pub trait LogbookConnector: Send + Sync {
    async fn open(&self, credentials: &Credentials) -> ClientResult<Box<dyn LogbookSession>>;
}

/// One authenticated session. Callers must `close` it when done.
#[async_trait]
pub trait LogbookSession: Send + Sync {
    /// Exchange the application secret for a session app token
    async fn obtain_app_token(&mut self, app_secret: &str) -> ClientResult<Option<String>>;

    /// Fetch the account's objects, `{"Object": [...]}`
    async fn get_objects(&self) -> ClientResult<Value>;

    /// Fetch bookings of one aircraft, `{"Booking": [...]}`
    async fn get_bookings(&self, aircraft_id: &str) -> ClientResult<Value>;

    async fn close(self: Box<Self>);
}

/// HTTP client wrapper with common configuration
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent("myweblog-bridge/1.0")
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn get_client(&self) -> &Client {
        &self.client
    }
}

/// MyWebLog connector backed by a shared reqwest client
pub struct MyWebLogClient {
    http_client: HttpClient,
    api_url: String,
    token_url: String,
}

impl MyWebLogClient {
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        Ok(Self {
            http_client: HttpClient::new(config)?,
            api_url: config.api_url.clone(),
            token_url: config.token_url.clone(),
        })
    }
}

#[async_trait]
impl LogbookConnector for MyWebLogClient {
    async fn open(&self, credentials: &Credentials) -> ClientResult<Box<dyn LogbookSession>> {
        Ok(Box::new(MyWebLogSession {
            client: self.http_client.get_client().clone(),
            api_url: self.api_url.clone(),
            token_url: self.token_url.clone(),
            credentials: credentials.clone(),
        }))
    }
}

pub struct MyWebLogSession {
    client: Client,
    api_url: String,
    token_url: String,
    credentials: Credentials,
}

impl MyWebLogSession {
    async fn post(&self, qtype: &str, extra: &[(&str, String)]) -> ClientResult<Value> {
        let creds = &self.credentials;
        let mut form: Vec<(&str, String)> = vec![
            ("qtype", qtype.to_string()),
            ("mwl_u", creds.username.clone()),
            ("mwl_p", creds.password.clone()),
            ("app_token", creds.app_token.clone().unwrap_or_default()),
            ("returnType", "JSON".to_string()),
            ("charset", "UTF-8".to_string()),
            ("language", "se".to_string()),
        ];
        form.extend(extra.iter().cloned());

        let resp = self
            .client
            .post(&self.api_url)
            .query(&[("version", API_VERSION)])
            .form(&form)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let json: Value = resp.json().await?;
        let result = match json.get("result") {
            Some(result) => result.clone(),
            None => json,
        };

        if let Some(msg) = result.get("errorMessage").and_then(Value::as_str) {
            if !msg.is_empty() {
                return Err(ClientError::Api(msg.to_string()));
            }
        }
        if !result.is_object() {
            return Err(ClientError::Malformed(format!(
                "{} returned a non-object result",
                qtype
            )));
        }

        Ok(result)
    }
}

#[async_trait]
impl LogbookSession for MyWebLogSession {
    async fn obtain_app_token(&mut self, app_secret: &str) -> ClientResult<Option<String>> {
        let resp = self
            .client
            .post(&self.token_url)
            .json(&serde_json::json!({ "app_secret": app_secret }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let json: Value = resp.json().await?;
        let token = json
            .get("app_token")
            .and_then(Value::as_str)
            .map(str::to_string);
        self.credentials.app_token = token.clone();
        Ok(token)
    }

    async fn get_objects(&self) -> ClientResult<Value> {
        self.post("GetObjects", &[]).await
    }

    async fn get_bookings(&self, aircraft_id: &str) -> ClientResult<Value> {
        let today = Utc::now().date_naive();
        let until = today + chrono::Days::new(BOOKINGS_WINDOW_DAYS);
        self.post(
            "GetBookings",
            &[
                ("ac_id", aircraft_id.to_string()),
                ("from_date", today.to_string()),
                ("to_date", until.to_string()),
                ("mybookings", "0".to_string()),
                ("includeSun", "0".to_string()),
            ],
        )
        .await
    }

    async fn close(self: Box<Self>) {
        debug!("Closing MyWebLog session for {}", self.credentials.username);
    }
}
