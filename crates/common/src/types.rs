//! Core types for vouchflow

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel message that asks the state store for its current state
/// without recording anything.
pub const GET_STATE_MESSAGE: &str = "__GET_STATE__";

/// Discriminator sent alongside [`GET_STATE_MESSAGE`].
pub const STATUS_CHECK_TYPE: &str = "status_check";

/// Discriminator for the final result publication.
pub const VOUCHER_COMPLETE_TYPE: &str = "voucher_generation_complete";

/// Which transient secret is being awaited.
///
/// Each kind is an independent rendezvous channel over the same store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretKind {
    MobileOtp,
    PaymentOtp,
}

impl SecretKind {
    pub const ALL: [SecretKind; 2] = [SecretKind::MobileOtp, SecretKind::PaymentOtp];

    /// Key used for this kind in the store's JSON response
    pub fn as_str(&self) -> &'static str {
        match self {
            SecretKind::MobileOtp => "mobile_otp",
            SecretKind::PaymentOtp => "payment_otp",
        }
    }

    /// How long a checkout run waits for this kind unless configured otherwise
    pub fn default_deadline(&self) -> Duration {
        match self {
            SecretKind::MobileOtp => Duration::from_secs(120),
            SecretKind::PaymentOtp => Duration::from_secs(180),
        }
    }
}

impl fmt::Display for SecretKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecretKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "mobile_otp" | "mobile" => Ok(SecretKind::MobileOtp),
            "payment_otp" | "payment" => Ok(SecretKind::PaymentOtp),
            other => Err(format!("unknown secret kind: {}", other)),
        }
    }
}

/// Point-in-time read of the external state store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Snapshot {
    /// Whether the store reports its own state as valid
    pub ok: bool,
    /// Secrets currently recorded, keyed by kind
    pub secrets: HashMap<SecretKind, String>,
    /// Validity horizon for whatever secrets are set
    pub expires_at: Option<DateTime<Utc>>,
    /// Free-form message from the store, if any
    pub message: Option<String>,
}

/// Result of looking up a secret in a [`Snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretLookup<'a> {
    Usable(&'a str),
    Absent,
    Stale { expired_at: DateTime<Utc> },
    NotOk,
}

impl Snapshot {
    pub fn secret(&self, kind: SecretKind) -> Option<&str> {
        self.secrets.get(&kind).map(String::as_str)
    }

    /// Apply the ok gate and the freshness gate for `kind` at wall time `now`.
    ///
    /// `skew` extends the validity window to absorb clock drift between the
    /// store and this process.
    pub fn usable_secret(&self, kind: SecretKind, now: DateTime<Utc>, skew: Duration) -> SecretLookup<'_> {
        if !self.ok {
            return SecretLookup::NotOk;
        }
        let Some(value) = self.secret(kind) else {
            return SecretLookup::Absent;
        };
        match self.expires_at {
            None => SecretLookup::Usable(value),
            Some(expires_at) if is_fresh(expires_at, now, skew) => SecretLookup::Usable(value),
            Some(expired_at) => SecretLookup::Stale { expired_at },
        }
    }
}

/// `now` is strictly before `expires_at` (shifted by `skew`).
///
/// A horizon past the representable range never expires.
pub fn is_fresh(expires_at: DateTime<Utc>, now: DateTime<Utc>, skew: Duration) -> bool {
    let Ok(skew) = chrono::Duration::from_std(skew) else {
        return true;
    };
    match expires_at.checked_add_signed(skew) {
        Some(horizon) => now < horizon,
        None => true,
    }
}

/// Wire shape of the store's response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile_otp: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_otp: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TryFrom<StateResponse> for Snapshot {
    type Error = TransportFailure;

    fn try_from(resp: StateResponse) -> Result<Self, Self::Error> {
        let mut secrets = HashMap::new();
        for (kind, raw) in [
            (SecretKind::MobileOtp, resp.mobile_otp),
            (SecretKind::PaymentOtp, resp.payment_otp),
        ] {
            if let Some(value) = raw.as_ref().and_then(secret_text) {
                secrets.insert(kind, value);
            }
        }

        let expires_at = match resp.expires_at {
            None | Some(serde_json::Value::Null) => None,
            Some(raw) => Some(parse_timestamp(&raw).ok_or_else(|| {
                TransportFailure::Decode(format!("unparseable expires_at: {}", raw))
            })?),
        };

        Ok(Snapshot {
            ok: resp.success,
            secrets,
            expires_at,
            message: resp.message,
        })
    }
}

/// OTP values arrive as strings but some relays send bare numbers.
fn secret_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accepts RFC 3339, zone-less ISO 8601 (taken as UTC) and epoch milliseconds.
pub fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| naive.and_utc())
        }
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

/// Why a state store call produced no snapshot. Kept for logging only; the
/// poller treats every flavour the same way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    Timeout,
    Connect(String),
    Status(u16),
    Decode(String),
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFailure::Timeout => write!(f, "request timed out"),
            TransportFailure::Connect(e) => write!(f, "connection failed: {}", e),
            TransportFailure::Status(code) => write!(f, "unexpected HTTP status {}", code),
            TransportFailure::Decode(e) => write!(f, "undecodable response: {}", e),
        }
    }
}

/// Outcome of a single `fetch_snapshot` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Snapshot(Snapshot),
    Failure(TransportFailure),
}

impl FetchOutcome {
    pub fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            FetchOutcome::Snapshot(s) => Some(s),
            FetchOutcome::Failure(_) => None,
        }
    }
}

/// Final result handed back to the state store at the end of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    pub voucher_code: String,
    pub voucher_pin: String,
    pub source: String,
    pub timestamp: String,
}

impl PublishPayload {
    pub fn voucher_generated(code: &str, pin: &str, at: DateTime<Utc>) -> Self {
        Self {
            kind: VOUCHER_COMPLETE_TYPE.to_string(),
            content: format!("Voucher generated successfully! Code: {}, PIN: {}", code, pin),
            voucher_code: code.to_string(),
            voucher_pin: pin.to_string(),
            source: "vouchflow".to_string(),
            timestamp: at.to_rfc3339(),
        }
    }
}

/// Payment instrument used at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentCard {
    #[default]
    MembershipRewards,
    #[serde(alias = "gold")]
    GoldCharge,
}

impl PaymentCard {
    /// Index of the `ADD` button for the voucher denomination bought with this card
    pub fn cart_slot(&self) -> usize {
        match self {
            PaymentCard::MembershipRewards => 3,
            PaymentCard::GoldCharge => 2,
        }
    }

    /// DOM id of the saved card on the payment page
    pub fn card_element_id(&self) -> &'static str {
        match self {
            PaymentCard::MembershipRewards => "1000075",
            PaymentCard::GoldCharge => "1000105",
        }
    }

    /// Environment variable holding this card's CVV
    pub fn cvv_variable(&self) -> &'static str {
        match self {
            PaymentCard::MembershipRewards => "CARD_CVV",
            PaymentCard::GoldCharge => "GOLD_CHARGE_CVV",
        }
    }
}

impl fmt::Display for PaymentCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentCard::MembershipRewards => write!(f, "membership_rewards"),
            PaymentCard::GoldCharge => write!(f, "gold_charge"),
        }
    }
}

impl FromStr for PaymentCard {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "membership_rewards" | "mr" => Ok(PaymentCard::MembershipRewards),
            "gold_charge" | "gold" => Ok(PaymentCard::GoldCharge),
            other => Err(format!("unknown payment card: {}", other)),
        }
    }
}

/// Body of `POST /start`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card: Option<PaymentCard>,
}

/// Response of `POST /start`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResponse {
    pub success: bool,
    pub message: String,
}

/// A run currently holding the admission guard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub id: String,
    pub card: PaymentCard,
    pub started_at: DateTime<Utc>,
}

/// How the most recent run ended
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub id: String,
    pub card: PaymentCard,
    pub success: bool,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Body of `GET /status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub busy: bool,
    pub current_run: Option<RunInfo>,
    pub last_run: Option<RunOutcome>,
    pub runs_started: u64,
    pub runs_succeeded: u64,
    pub runs_failed: u64,
    pub version: String,
}

/// Hide all but the last two characters of a secret for logging.
pub fn mask_secret(value: &str) -> String {
    let count = value.chars().count();
    if count <= 2 {
        return "*".repeat(count);
    }
    let tail: String = value.chars().skip(count - 2).collect();
    format!("{}{}", "*".repeat(count - 2), tail)
}
