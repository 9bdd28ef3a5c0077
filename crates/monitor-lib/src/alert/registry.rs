//! Name-to-factory registry for alert channels
//!
//! Channels are described in configuration by a [`ChannelSpec`] and built
//! by the factory registered under the spec's `kind`.

use super::channels::{
    AlertChannel, ConsoleChannel, EmailChannel, PagerDutyChannel, SlackChannel, WebhookChannel,
    PAGERDUTY_EVENTS_URL,
};
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Default SMTP submission port
const DEFAULT_SMTP_PORT: u16 = 587;

/// Configuration for one alert channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Registered channel kind, e.g. "slack"
    pub kind: String,
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
}

impl ChannelSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            options: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// String option. Numbers and booleans are accepted in string form.
    pub fn optional_str(&self, key: &str) -> Option<String> {
        match self.options.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn required_str(&self, key: &str) -> Result<String> {
        self.optional_str(key)
            .ok_or_else(|| anyhow!("{} channel requires option '{}'", self.kind, key))
    }

    pub fn optional_u16(&self, key: &str) -> Result<Option<u16>> {
        self.optional_str(key)
            .map(|v| {
                v.parse::<u16>()
                    .with_context(|| format!("option '{key}' must be a port number"))
            })
            .transpose()
    }

    /// List option given as an array or a comma-separated string
    pub fn string_list(&self, key: &str) -> Vec<String> {
        match self.options.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Map option given as an object or `k=v` pairs separated by commas
    pub fn string_map(&self, key: &str) -> Result<BTreeMap<String, String>> {
        match self.options.get(key) {
            None | Some(Value::Null) => Ok(BTreeMap::new()),
            Some(Value::Object(map)) => Ok(map
                .iter()
                .map(|(k, v)| {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect()),
            Some(Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|pair| !pair.is_empty())
                .map(|pair| {
                    pair.split_once('=')
                        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                        .ok_or_else(|| anyhow!("option '{key}' entry '{pair}' is not k=v"))
                })
                .collect(),
            Some(other) => bail!("option '{key}' must be a map, got {other}"),
        }
    }
}

/// Builds a channel from its configuration
pub type ChannelFactory = Box<dyn Fn(&ChannelSpec) -> Result<Arc<dyn AlertChannel>> + Send + Sync>;

/// Registry of channel factories keyed by kind
pub struct ChannelRegistry {
    factories: HashMap<String, ChannelFactory>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ChannelRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with console, email, slack, pagerduty and webhook channels
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("console", |_| Ok(Arc::new(ConsoleChannel::new())));
        registry.register("email", build_email);
        registry.register("slack", build_slack);
        registry.register("pagerduty", build_pagerduty);
        registry.register("webhook", build_webhook);
        registry
    }

    /// Register (or replace) the factory for `kind`
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&ChannelSpec) -> Result<Arc<dyn AlertChannel>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<_> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn build(&self, spec: &ChannelSpec) -> Result<Arc<dyn AlertChannel>> {
        let factory = self
            .factories
            .get(&spec.kind)
            .ok_or_else(|| anyhow!("unknown alert channel kind '{}'", spec.kind))?;
        factory(spec)
    }
}

fn build_email(spec: &ChannelSpec) -> Result<Arc<dyn AlertChannel>> {
    let to = spec.string_list("to");
    if to.is_empty() {
        bail!("email channel requires at least one recipient in 'to'");
    }

    Ok(Arc::new(EmailChannel {
        smtp_server: spec.required_str("smtp_server")?,
        smtp_port: spec.optional_u16("smtp_port")?.unwrap_or(DEFAULT_SMTP_PORT),
        from: spec.required_str("from")?,
        to,
        username: spec.optional_str("username"),
        password: spec.optional_str("password"),
    }))
}

fn build_slack(spec: &ChannelSpec) -> Result<Arc<dyn AlertChannel>> {
    let channel = SlackChannel::new(
        spec.required_str("webhook_url")?,
        spec.optional_str("channel"),
        spec.optional_str("username")
            .unwrap_or_else(|| "etcd-monitor".to_string()),
    )?;
    Ok(Arc::new(channel))
}

fn build_pagerduty(spec: &ChannelSpec) -> Result<Arc<dyn AlertChannel>> {
    let routing_key = spec
        .optional_str("routing_key")
        .or_else(|| spec.optional_str("integration_key"))
        .ok_or_else(|| anyhow!("pagerduty channel requires option 'routing_key'"))?;
    let events_url = spec
        .optional_str("events_url")
        .unwrap_or_else(|| PAGERDUTY_EVENTS_URL.to_string());
    Ok(Arc::new(PagerDutyChannel::with_events_url(
        routing_key,
        events_url,
    )?))
}

fn build_webhook(spec: &ChannelSpec) -> Result<Arc<dyn AlertChannel>> {
    let url = spec.required_str("url")?;
    url::Url::parse(&url).with_context(|| format!("invalid webhook url '{url}'"))?;
    let headers = spec.string_map("headers")?;
    Ok(Arc::new(WebhookChannel::new(url, headers)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_kinds() {
        let registry = ChannelRegistry::with_builtins();
        assert_eq!(
            registry.kinds(),
            vec!["console", "email", "pagerduty", "slack", "webhook"]
        );
    }

    #[test]
    fn test_build_console() {
        let registry = ChannelRegistry::with_builtins();
        let channel = registry.build(&ChannelSpec::new("console")).unwrap();
        assert_eq!(channel.name(), "console");
    }

    #[test]
    fn test_unknown_kind() {
        let registry = ChannelRegistry::with_builtins();
        let err = registry.build(&ChannelSpec::new("carrier-pigeon")).err().unwrap();
        assert!(err.to_string().contains("unknown alert channel kind"));
    }

    #[test]
    fn test_build_email() {
        let registry = ChannelRegistry::with_builtins();
        let spec = ChannelSpec::new("email")
            .with_option("smtp_server", "smtp.example.com")
            .with_option("smtp_port", 25)
            .with_option("from", "monitor@example.com")
            .with_option("to", "ops@example.com, dba@example.com");
        assert_eq!(registry.build(&spec).unwrap().name(), "email");

        let missing_to = ChannelSpec::new("email")
            .with_option("smtp_server", "smtp.example.com")
            .with_option("from", "monitor@example.com");
        assert!(registry.build(&missing_to).is_err());
    }

    #[test]
    fn test_build_http_channels() {
        let registry = ChannelRegistry::with_builtins();

        let slack = ChannelSpec::new("slack").with_option("webhook_url", "https://hooks.example.com/x");
        assert_eq!(registry.build(&slack).unwrap().name(), "slack");

        let pagerduty = ChannelSpec::new("pagerduty").with_option("integration_key", "abc");
        assert_eq!(registry.build(&pagerduty).unwrap().name(), "pagerduty");

        let webhook = ChannelSpec::new("webhook")
            .with_option("url", "https://alerts.example.com/in")
            .with_option("headers", json!({ "Authorization": "Bearer t" }));
        assert_eq!(registry.build(&webhook).unwrap().name(), "webhook");

        let bad_url = ChannelSpec::new("webhook").with_option("url", "not a url");
        assert!(registry.build(&bad_url).is_err());

        assert!(registry.build(&ChannelSpec::new("slack")).is_err());
    }

    #[test]
    fn test_custom_factory() {
        let mut registry = ChannelRegistry::new();
        assert!(!registry.contains("console"));
        registry.register("stdout", |_| Ok(Arc::new(ConsoleChannel::new())));
        assert!(registry.contains("stdout"));
        assert!(registry.build(&ChannelSpec::new("stdout")).is_ok());
    }

    #[test]
    fn test_spec_option_parsing() {
        let spec = ChannelSpec::new("webhook")
            .with_option("headers", "X-A=1, X-B = two")
            .with_option("port", "70000")
            .with_option("to", json!(["a@example.com", "b@example.com"]));

        let headers = spec.string_map("headers").unwrap();
        assert_eq!(headers.get("X-A").map(String::as_str), Some("1"));
        assert_eq!(headers.get("X-B").map(String::as_str), Some("two"));
        assert!(spec.optional_u16("port").is_err());
        assert_eq!(spec.string_list("to").len(), 2);
        assert!(spec.string_map("missing").unwrap().is_empty());

        let bad = ChannelSpec::new("webhook").with_option("headers", "novalue");
        assert!(bad.string_map("headers").is_err());
    }

    #[test]
    fn test_spec_deserializes_from_json() {
        let spec: ChannelSpec = serde_json::from_value(json!({
            "kind": "slack",
            "options": { "webhook_url": "https://hooks.example.com/x", "channel": "#ops" },
        }))
        .unwrap();
        assert_eq!(spec.kind, "slack");
        assert_eq!(spec.optional_str("channel").as_deref(), Some("#ops"));
    }
}
