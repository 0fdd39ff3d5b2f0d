use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::GatewayConfig;
use crate::db::Channel;
use crate::error::{AppError, AppResult};

/// A rendered message ready to hand to a provider.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Normalized recipient address.
    pub to: String,
    pub body: String,
    /// Where the provider should post delivery receipts, if anywhere.
    pub status_callback: Option<String>,
}

/// Outbound provider for one channel.
///
/// `send` returns the provider's message reference on success. Failures
/// carry the provider's own error text in `AppError::Gateway`.
#[async_trait]
pub trait GatewayAdapter: Send + Sync + 'static {
    fn channel(&self) -> Channel;

    async fn send(&self, message: &OutboundMessage) -> AppResult<String>;
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    sid: String,
}

/// SMS provider speaking the common `Accounts/{sid}/Messages.json` form API.
#[derive(Clone)]
pub struct HttpSmsGateway {
    client: Client,
    api_base_url: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl HttpSmsGateway {
    /// Build the gateway, or `None` when credentials are incomplete.
    pub fn from_config(config: &GatewayConfig) -> AppResult<Option<Self>> {
        if !config.is_configured() {
            return Ok(None);
        }
        let (Some(account_sid), Some(auth_token), Some(from_number)) = (
            config.account_sid.clone(),
            config.auth_token.clone(),
            config.from_number.clone(),
        ) else {
            return Ok(None);
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        Ok(Some(Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            account_sid,
            auth_token,
            from_number,
        }))
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/Accounts/{}/Messages.json",
            self.api_base_url, self.account_sid
        )
    }
}

#[async_trait]
impl GatewayAdapter for HttpSmsGateway {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    async fn send(&self, message: &OutboundMessage) -> AppResult<String> {
        let mut form = vec![
            ("To", message.to.as_str()),
            ("From", self.from_number.as_str()),
            ("Body", message.body.as_str()),
        ];
        if let Some(callback) = message.status_callback.as_deref() {
            form.push(("StatusCallback", callback));
        }

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("SMS gateway request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Gateway(format!(
                "SMS gateway error ({}): {}",
                status.as_u16(),
                error_text
            )));
        }

        let parsed = response.json::<MessageResponse>().await.map_err(|e| {
            AppError::Gateway(format!("Failed to parse SMS gateway response: {}", e))
        })?;

        tracing::debug!("SMS accepted by provider as {}", parsed.sid);
        Ok(parsed.sid)
    }
}

/// Configured adapters keyed by channel. A channel missing here is
/// "not configured".
#[derive(Clone, Default)]
pub struct Gateways {
    adapters: HashMap<Channel, Arc<dyn GatewayAdapter>>,
}

impl Gateways {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, adapter: Arc<dyn GatewayAdapter>) -> Self {
        self.adapters.insert(adapter.channel(), adapter);
        self
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn GatewayAdapter>> {
        self.adapters.get(&channel).cloned()
    }

    pub fn is_configured(&self, channel: Channel) -> bool {
        self.adapters.contains_key(&channel)
    }

    pub fn from_config(config: &GatewayConfig) -> AppResult<Self> {
        let mut gateways = Self::new();
        if let Some(sms) = HttpSmsGateway::from_config(config)? {
            gateways = gateways.with(Arc::new(sms));
        }
        Ok(gateways)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedGateway;

    fn configured() -> GatewayConfig {
        GatewayConfig {
            account_sid: Some("AC123".to_string()),
            auth_token: Some("secret".to_string()),
            from_number: Some("+15550000000".to_string()),
            api_base_url: "https://sms.example.com/2010-04-01/".to_string(),
            timeout_seconds: 5,
            webhook_secret: None,
        }
    }

    #[test]
    fn incomplete_credentials_yield_no_gateway() {
        let mut config = configured();
        config.from_number = None;
        assert!(HttpSmsGateway::from_config(&config).unwrap().is_none());
        assert!(!Gateways::from_config(&config).unwrap().is_configured(Channel::Sms));
    }

    #[test]
    fn messages_url_uses_account() {
        let gateway = HttpSmsGateway::from_config(&configured()).unwrap().unwrap();
        assert_eq!(
            gateway.messages_url(),
            "https://sms.example.com/2010-04-01/Accounts/AC123/Messages.json"
        );
    }

    #[tokio::test]
    async fn registry_routes_by_channel() {
        let gateways = Gateways::new().with(Arc::new(ScriptedGateway::new()));
        let sms = gateways.get(Channel::Sms).unwrap();
        let reference = sms
            .send(&OutboundMessage {
                to: "+15551234567".to_string(),
                body: "hi".to_string(),
                status_callback: None,
            })
            .await
            .unwrap();
        assert_eq!(reference, "SM0001");
    }
}
