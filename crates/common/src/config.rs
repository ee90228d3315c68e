//! vouchflow configuration
//!
//! Values come from an optional TOML file, then environment variables
//! override individual fields. Durations are stored as milliseconds.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::rendezvous::PollerConfig;
use crate::types::{PaymentCard, SecretKind};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// External state store (OTP relay)
    pub store: StoreConfig,

    /// OTP polling behaviour
    pub poller: PollerSettings,

    /// Checkout flow
    pub checkout: CheckoutConfig,

    /// Trigger server
    pub server: ServerConfig,

    /// Voucher claim endpoint
    pub claim: ClaimConfig,
}

/// State store endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base URL of the workflow host
    pub base_url: String,

    /// Webhook path appended to `base_url`
    pub webhook_path: String,

    /// Timeout for state reads and health checks
    pub request_timeout_ms: u64,

    /// Timeout for result publication
    pub publish_timeout_ms: u64,

    /// User-Agent header sent with every call
    pub user_agent: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5678".to_string(),
            webhook_path: "/webhook/ios-sms".to_string(),
            request_timeout_ms: 5_000,
            publish_timeout_ms: 10_000,
            user_agent: format!("vouchflow/{}", crate::VERSION),
        }
    }
}

impl StoreConfig {
    /// Full URL the client posts to
    pub fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = self.webhook_path.trim();
        if path.is_empty() {
            base.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

/// Largest clock skew tolerance accepted from configuration
pub const MAX_CLOCK_SKEW_MS: u64 = 10 * 60 * 1000;

/// Rendezvous polling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerSettings {
    pub poll_interval_ms: u64,
    pub error_backoff_ms: u64,
    pub max_consecutive_errors: u32,
    pub initial_wait_ms: u64,
    pub clock_skew_tolerance_ms: u64,
    pub mobile_otp_deadline_ms: u64,
    pub payment_otp_deadline_ms: u64,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            error_backoff_ms: 10_000,
            max_consecutive_errors: 3,
            initial_wait_ms: 2_000,
            clock_skew_tolerance_ms: 0,
            mobile_otp_deadline_ms: SecretKind::MobileOtp.default_deadline().as_millis() as u64,
            payment_otp_deadline_ms: SecretKind::PaymentOtp.default_deadline().as_millis() as u64,
        }
    }
}

impl PollerSettings {
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            error_backoff: Duration::from_millis(self.error_backoff_ms),
            max_consecutive_errors: self.max_consecutive_errors,
            initial_wait: Duration::from_millis(self.initial_wait_ms),
            clock_skew_tolerance: Duration::from_millis(self.clock_skew_tolerance_ms),
        }
    }

    /// Reject settings the poller cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig("poll_interval_ms must be greater than 0".to_string()));
        }
        if self.error_backoff_ms <= self.poll_interval_ms {
            return Err(Error::InvalidConfig(format!(
                "error_backoff_ms ({}) must be longer than poll_interval_ms ({})",
                self.error_backoff_ms, self.poll_interval_ms
            )));
        }
        if self.max_consecutive_errors == 0 {
            return Err(Error::InvalidConfig("max_consecutive_errors must be at least 1".to_string()));
        }
        if self.clock_skew_tolerance_ms > MAX_CLOCK_SKEW_MS {
            return Err(Error::InvalidConfig(format!(
                "clock_skew_tolerance_ms ({}) exceeds the {} ms limit",
                self.clock_skew_tolerance_ms, MAX_CLOCK_SKEW_MS
            )));
        }
        Ok(())
    }

    /// How long a checkout run waits for `kind`
    pub fn deadline(&self, kind: SecretKind) -> Duration {
        match kind {
            SecretKind::MobileOtp => Duration::from_millis(self.mobile_otp_deadline_ms),
            SecretKind::PaymentOtp => Duration::from_millis(self.payment_otp_deadline_ms),
        }
    }
}

/// Checkout flow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckoutConfig {
    /// Voucher listing page the flow starts from
    pub voucher_url: String,

    pub mobile: Option<String>,
    pub email: Option<String>,

    /// CVV for the membership rewards card
    pub card_cvv: Option<String>,

    /// CVV for the gold charge card
    pub gold_charge_cvv: Option<String>,

    /// Card used when a run does not ask for one
    pub default_card: PaymentCard,

    /// Run Chromium headless
    pub headless: bool,

    /// Where failure and final screenshots are written
    pub screenshot_dir: PathBuf,

    /// Node.js binary used to host the Playwright bridge
    pub node_binary: String,

    /// `NODE_PATH` for resolving the `playwright` package
    pub node_path: Option<PathBuf>,

    pub navigation_timeout_ms: u64,
    pub safekey_timeout_ms: u64,

    /// Send extracted voucher details back to the state store
    pub publish_result: bool,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            voucher_url: "https://www.gyftr.com/amexrewardmultiplier/swiggy-gv-gift-vouchers".to_string(),
            mobile: None,
            email: None,
            card_cvv: None,
            gold_charge_cvv: None,
            default_card: PaymentCard::MembershipRewards,
            headless: true,
            screenshot_dir: PathBuf::from("."),
            node_binary: "node".to_string(),
            node_path: None,
            navigation_timeout_ms: 60_000,
            safekey_timeout_ms: 120_000,
            publish_result: true,
        }
    }
}

/// Contact details and CVV for one checkout run
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub mobile: String,
    pub email: String,
    pub cvv: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("mobile", &self.mobile)
            .field("email", &self.email)
            .field("cvv", &"***")
            .finish()
    }
}

impl CheckoutConfig {
    /// Resolve credentials for `card`, naming the first missing variable
    pub fn credentials(&self, card: PaymentCard) -> Result<Credentials> {
        let cvv = match card {
            PaymentCard::MembershipRewards => &self.card_cvv,
            PaymentCard::GoldCharge => &self.gold_charge_cvv,
        };

        Ok(Credentials {
            mobile: required(&self.mobile, "MOBILE")?,
            email: required(&self.email, "EMAIL")?,
            cvv: required(cvv, card.cvv_variable())?,
        })
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn safekey_timeout(&self) -> Duration {
        Duration::from_millis(self.safekey_timeout_ms)
    }
}

fn required(value: &Option<String>, name: &str) -> Result<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or_else(|| Error::MissingVariable(name.to_string()))
}

/// Trigger server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3000".to_string(),
        }
    }
}

/// Voucher claim endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimConfig {
    pub url: String,
    pub device_id: Option<String>,
    pub tid: Option<String>,
    pub token: Option<String>,
    pub timeout_ms: u64,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            url: "https://chkout.swiggy.com/swiggymoney/voucher/claim".to_string(),
            device_id: None,
            tid: None,
            token: None,
            timeout_ms: 10_000,
        }
    }
}

impl AppConfig {
    /// Load configuration from file, falling back to defaults
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// File (`~/.vouchflow/config.toml` when none is given), then `.env` file
    /// (if any), then the process environment.
    ///
    /// Process variables take precedence over `.env` entries.
    pub fn resolve(path: Option<&Path>, env_file: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None => Self::load(&crate::default_config_path())?,
        };

        let file_vars = match env_file {
            Some(p) if p.exists() => read_env_file(p)?,
            _ => HashMap::new(),
        };

        config.apply_env(|key| std::env::var(key).ok().or_else(|| file_vars.get(key).cloned()))?;
        config.poller.validate()?;
        Ok(config)
    }

    /// Overlay environment variables on top of the current values
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("N8N_BASE_URL") {
            self.store.base_url = v;
        }
        if let Some(v) = get("WEBHOOK_PATH") {
            self.store.webhook_path = v;
        }
        if let Some(v) = get("VOUCHFLOW_STORE_TIMEOUT_MS") {
            self.store.request_timeout_ms = parse_number("VOUCHFLOW_STORE_TIMEOUT_MS", &v)?;
        }

        if let Some(v) = get("VOUCHFLOW_POLL_INTERVAL_MS") {
            self.poller.poll_interval_ms = parse_number("VOUCHFLOW_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("VOUCHFLOW_ERROR_BACKOFF_MS") {
            self.poller.error_backoff_ms = parse_number("VOUCHFLOW_ERROR_BACKOFF_MS", &v)?;
        }
        if let Some(v) = get("VOUCHFLOW_MAX_ERRORS") {
            self.poller.max_consecutive_errors = parse_number("VOUCHFLOW_MAX_ERRORS", &v)?;
        }
        if let Some(v) = get("VOUCHFLOW_CLOCK_SKEW_MS") {
            self.poller.clock_skew_tolerance_ms = parse_number("VOUCHFLOW_CLOCK_SKEW_MS", &v)?;
        }

        if let Some(v) = get("MOBILE") {
            self.checkout.mobile = Some(v);
        }
        if let Some(v) = get("EMAIL") {
            self.checkout.email = Some(v);
        }
        if let Some(v) = get("CARD_CVV") {
            self.checkout.card_cvv = Some(v);
        }
        if let Some(v) = get("GOLD_CHARGE_CVV") {
            self.checkout.gold_charge_cvv = Some(v);
        }
        if let Some(v) = get("GOLD_CHARGE") {
            if parse_flag("GOLD_CHARGE", &v)? {
                self.checkout.default_card = PaymentCard::GoldCharge;
            }
        }
        if let Some(v) = get("VOUCHFLOW_HEADLESS") {
            self.checkout.headless = parse_flag("VOUCHFLOW_HEADLESS", &v)?;
        }
        if let Some(v) = get("VOUCHFLOW_SCREENSHOT_DIR") {
            self.checkout.screenshot_dir = PathBuf::from(v);
        }
        if let Some(v) = get("NODE_PATH") {
            self.checkout.node_path = Some(PathBuf::from(v));
        }

        if let Some(v) = get("VOUCHFLOW_LISTEN") {
            self.server.listen = v;
        }

        if let Some(v) = get("SWIGGY_VOUCHER_CLAIM_URL") {
            self.claim.url = v;
        }
        if let Some(v) = get("SWIGGY_DEVICE_ID") {
            self.claim.device_id = Some(v);
        }
        if let Some(v) = get("SWIGGY_TID") {
            self.claim.tid = Some(v);
        }
        if let Some(v) = get("SWIGGY_TOKEN") {
            self.claim.token = Some(v);
        }

        Ok(())
    }
}

/// Parse a `.env` file into a map without touching the process environment
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    for item in dotenvy::from_path_iter(path)? {
        let (key, value) = item?;
        vars.insert(key, value);
    }
    Ok(vars)
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{} must be a number, got {:?}", name, value)))
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidConfig(format!("{} must be true or false, got {:?}", name, value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_endpoint_joining() {
        let mut store = StoreConfig {
            base_url: "https://n8n.example.com/".to_string(),
            ..Default::default()
        };
        assert_eq!(store.endpoint(), "https://n8n.example.com/webhook/ios-sms");

        store.webhook_path = "webhook/other".to_string();
        assert_eq!(store.endpoint(), "https://n8n.example.com/webhook/other");
    }

    #[test]
    fn test_env_overlay() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[
                ("N8N_BASE_URL", "https://relay.example.com"),
                ("MOBILE", "9999999999"),
                ("EMAIL", "me@example.com"),
                ("CARD_CVV", "1234"),
                ("GOLD_CHARGE", "true"),
                ("VOUCHFLOW_MAX_ERRORS", "5"),
                ("VOUCHFLOW_HEADLESS", "false"),
            ]))
            .unwrap();

        assert_eq!(config.store.endpoint(), "https://relay.example.com/webhook/ios-sms");
        assert_eq!(config.poller.max_consecutive_errors, 5);
        assert_eq!(config.checkout.default_card, PaymentCard::GoldCharge);
        assert!(!config.checkout.headless);
    }

    #[test]
    fn test_env_overlay_rejects_bad_numbers() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(env(&[("VOUCHFLOW_POLL_INTERVAL_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_credentials_name_missing_variable() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[("MOBILE", "9999999999"), ("EMAIL", "me@example.com"), ("CARD_CVV", "123")]))
            .unwrap();

        let creds = config.checkout.credentials(PaymentCard::MembershipRewards).unwrap();
        assert_eq!(creds.cvv, "123");
        assert!(!format!("{:?}", creds).contains("123\""));

        match config.checkout.credentials(PaymentCard::GoldCharge) {
            Err(Error::MissingVariable(name)) => assert_eq!(name, "GOLD_CHARGE_CVV"),
            other => panic!("expected missing variable, got {:?}", other),
        }
    }

    #[test]
    fn test_poller_settings_conversion() {
        let settings = PollerSettings::default();
        let poller = settings.poller_config();
        assert_eq!(poller.poll_interval, Duration::from_secs(5));
        assert_eq!(poller.max_consecutive_errors, 3);
        assert_eq!(settings.deadline(SecretKind::PaymentOtp), Duration::from_secs(180));
    }

    #[test]
    fn test_poller_settings_validation() {
        assert!(PollerSettings::default().validate().is_ok());

        let rejected = [
            ("VOUCHFLOW_POLL_INTERVAL_MS", "20000"),
            ("VOUCHFLOW_POLL_INTERVAL_MS", "0"),
            ("VOUCHFLOW_ERROR_BACKOFF_MS", "5000"),
            ("VOUCHFLOW_MAX_ERRORS", "0"),
            ("VOUCHFLOW_CLOCK_SKEW_MS", "18446744073709551615"),
        ];
        for (key, value) in rejected {
            let mut config = AppConfig::default();
            config.apply_env(env(&[(key, value)])).unwrap();
            let err = config.poller.validate().unwrap_err();
            assert!(matches!(err, Error::InvalidConfig(_)), "{}={} should be rejected", key, value);
        }

        let mut config = AppConfig::default();
        config
            .apply_env(env(&[("VOUCHFLOW_CLOCK_SKEW_MS", "2000"), ("VOUCHFLOW_MAX_ERRORS", "1")]))
            .unwrap();
        assert!(config.poller.validate().is_ok());
    }

    #[test]
    fn test_resolve_rejects_invalid_poller_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vouchflow.toml");
        std::fs::write(&path, "[poller]\npoll_interval_ms = 20000\n").unwrap();

        let err = AppConfig::resolve(Some(&path), None).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_load_save_roundtrip_and_partial_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vouchflow.toml");

        std::fs::write(&path, "[poller]\npoll_interval_ms = 1500\n").unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.poller.poll_interval_ms, 1500);
        assert_eq!(config.poller.max_consecutive_errors, 3);

        config.save(&path).unwrap();
        let reloaded = AppConfig::load(&path).unwrap();
        assert_eq!(reloaded.poller.poll_interval_ms, 1500);

        let missing = AppConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(missing.server.listen, "0.0.0.0:3000");
    }

    #[test]
    fn test_read_env_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(".env");
        std::fs::write(&path, "# comment\nMOBILE=9876543210\nN8N_BASE_URL=http://n8n:5678\n").unwrap();

        let vars = read_env_file(&path).unwrap();
        assert_eq!(vars.get("MOBILE").map(String::as_str), Some("9876543210"));
        assert_eq!(vars.len(), 2);
    }
}
