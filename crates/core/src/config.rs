use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `ORDERDESK__` and nested with `__` separators.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub billing: BillingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Policy knobs for the subscription lifecycle and invoice workflow.
#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    #[serde(default = "default_trial_days")]
    pub trial_days: i64,
    #[serde(default = "default_billing_period_days")]
    pub billing_period_days: i64,
    /// Days a tenant may stay overdue before being suspended.
    #[serde(default = "default_grace_days")]
    pub grace_days: i64,
    #[serde(default = "default_ending_soon_days")]
    pub ending_soon_days: i64,
    #[serde(default = "default_ending_urgent_days")]
    pub ending_urgent_days: i64,
    #[serde(default = "default_invoice_due_days")]
    pub invoice_due_days: i64,
}

// Default functions
fn default_node_id() -> String {
    "orderdesk-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_trial_days() -> i64 {
    14
}
fn default_billing_period_days() -> i64 {
    30
}
fn default_grace_days() -> i64 {
    7
}
fn default_ending_soon_days() -> i64 {
    5
}
fn default_ending_urgent_days() -> i64 {
    2
}
fn default_invoice_due_days() -> i64 {
    7
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            billing: BillingConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            trial_days: default_trial_days(),
            billing_period_days: default_billing_period_days(),
            grace_days: default_grace_days(),
            ending_soon_days: default_ending_soon_days(),
            ending_urgent_days: default_ending_urgent_days(),
            invoice_due_days: default_invoice_due_days(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("ORDERDESK")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.api.http_port, 8080);
        assert_eq!(cfg.billing.trial_days, 14);
        assert_eq!(cfg.billing.grace_days, 7);
        assert_eq!(cfg.billing.billing_period_days, 30);
    }
}
