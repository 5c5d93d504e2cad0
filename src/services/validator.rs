use crate::clients::{LogbookConnector, LogbookSession};
use crate::domain::{Credentials, TrackedAircraft};
use crate::errors::{ClientResult, ValidationError};
use crate::utils::{is_registration, s_pick};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of a successful credential check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validated {
    pub airplanes: Vec<TrackedAircraft>,
    pub app_token: String,
}

/// Authenticates against the remote service and lists selectable aircraft
#[derive(Clone)]
pub struct CredentialValidator {
    connector: Arc<dyn LogbookConnector>,
    app_secret: String,
}

impl CredentialValidator {
    pub fn new(connector: Arc<dyn LogbookConnector>, app_secret: impl Into<String>) -> Self {
        Self {
            connector,
            app_secret: app_secret.into(),
        }
    }

    /// Exchange the app secret for a token and fetch the aircraft list.
    ///
    /// Remote failures are always reclassified as `InvalidAuth` or
    /// `CannotConnect`; the session is closed on every path.
    pub async fn validate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Validated, ValidationError> {
        let credentials = Credentials {
            username: username.to_string(),
            password: password.to_string(),
            app_token: None,
        };

        let mut session = self
            .connector
            .open(&credentials)
            .await
            .map_err(|e| ValidationError::from_remote(&e))?;
        let outcome = self.fetch(session.as_mut()).await;
        session.close().await;

        let (app_token, objects) = outcome.map_err(|e| ValidationError::from_remote(&e))?;
        let airplanes = selectable_aircraft(&objects);
        info!(
            "Validated credentials for {}: {} selectable aircraft",
            username,
            airplanes.len()
        );
        Ok(Validated {
            airplanes,
            app_token: app_token.unwrap_or_default(),
        })
    }

    async fn fetch(
        &self,
        session: &mut dyn LogbookSession,
    ) -> ClientResult<(Option<String>, Value)> {
        let app_token = session.obtain_app_token(&self.app_secret).await?;
        let objects = session.get_objects().await?;
        Ok((app_token, objects))
    }
}

/// Keep objects with a valid tail number and an id, in remote order
pub fn selectable_aircraft(objects: &Value) -> Vec<TrackedAircraft> {
    let Some(list) = objects.get("Object").and_then(Value::as_array) else {
        return Vec::new();
    };
    list.iter()
        .filter_map(|obj| {
            let regnr = obj.get("regnr").and_then(Value::as_str).unwrap_or_default();
            let id = s_pick(obj, &["ID"])?;
            if !is_registration(regnr) {
                debug!("Skipping object {} with registration {:?}", id, regnr);
                return None;
            }
            let model = obj.get("model").and_then(Value::as_str).unwrap_or_default();
            Some(TrackedAircraft {
                id,
                regnr: regnr.to_string(),
                title: format!("{} ({})", regnr, model),
            })
        })
        .collect()
}
