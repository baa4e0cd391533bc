// Connection configuration

use std::time::Duration;

/// Default OnlyCat gateway endpoint.
pub const DEFAULT_GATEWAY_URL: &str = "https://gateway.onlycat.com";

/// Gateway connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Gateway endpoint URL
    pub gateway_url: String,
    /// Client platform identifier, attached as connection query metadata
    pub platform: String,
    /// Client device identifier, attached as connection query metadata
    pub device: String,
    /// How long a request may stay in flight before it settles as timed out
    pub request_timeout: Duration,
    /// Enable auto-reconnect
    pub enable_auto_reconnect: bool,
    /// Base reconnection delay
    pub reconnect_delay: Duration,
    /// Cap on the reconnection delay
    pub max_reconnect_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            platform: "rust".to_string(),
            device: "onlycat-rs".to_string(),
            request_timeout: Duration::from_secs(30),
            enable_auto_reconnect: true,
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(60),
        }
    }
}

impl ConnectionConfig {
    /// Create configuration builder
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }
}

/// Connection configuration builder
#[derive(Default)]
pub struct ConnectionConfigBuilder {
    gateway_url: Option<String>,
    platform: Option<String>,
    device: Option<String>,
    request_timeout: Option<Duration>,
    enable_auto_reconnect: Option<bool>,
    reconnect_delay: Option<Duration>,
    max_reconnect_delay: Option<Duration>,
}

impl ConnectionConfigBuilder {
    /// Set gateway endpoint URL
    pub fn gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = Some(url.into());
        self
    }

    /// Set client platform identifier
    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    /// Set client device identifier
    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Set request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Enable auto-reconnect
    pub fn enable_auto_reconnect(mut self, enable: bool) -> Self {
        self.enable_auto_reconnect = Some(enable);
        self
    }

    /// Set base reconnection delay
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = Some(delay);
        self
    }

    /// Set reconnection delay cap
    pub fn max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.max_reconnect_delay = Some(delay);
        self
    }

    /// Build configuration
    pub fn build(self) -> ConnectionConfig {
        let default = ConnectionConfig::default();

        ConnectionConfig {
            gateway_url: self.gateway_url.unwrap_or(default.gateway_url),
            platform: self.platform.unwrap_or(default.platform),
            device: self.device.unwrap_or(default.device),
            request_timeout: self.request_timeout.unwrap_or(default.request_timeout),
            enable_auto_reconnect: self
                .enable_auto_reconnect
                .unwrap_or(default.enable_auto_reconnect),
            reconnect_delay: self.reconnect_delay.unwrap_or(default.reconnect_delay),
            max_reconnect_delay: self
                .max_reconnect_delay
                .unwrap_or(default.max_reconnect_delay),
        }
    }
}
