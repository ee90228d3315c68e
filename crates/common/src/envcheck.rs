//! Pre-deployment environment validation

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;

use crate::config::read_env_file;
use crate::error::Result;

/// Values copied from the example env file that were never filled in
const PLACEHOLDERS: &[&str] = &["your_mobile_number", "your_email@example.com"];

#[derive(Debug, Clone, Copy)]
pub struct VarSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub default: Option<&'static str>,
}

const fn var(name: &'static str, description: &'static str, default: Option<&'static str>) -> VarSpec {
    VarSpec { name, description, default }
}

pub const REQUIRED: &[(&str, &[VarSpec])] = &[
    (
        "AmEx Gyftr",
        &[
            var("MOBILE", "Your mobile number", None),
            var("EMAIL", "Your email address", None),
            var("CARD_CVV", "Card CVV", None),
        ],
    ),
    (
        "n8n Configuration",
        &[
            var("N8N_HOST", "n8n host domain", None),
            var("N8N_BASE_URL", "n8n base URL", None),
            var("N8N_PORT", "n8n port", Some("5678")),
        ],
    ),
];

pub const OPTIONAL: &[(&str, &[VarSpec])] = &[
    (
        "Swiggy Auto-Claim",
        &[
            var("SWIGGY_VOUCHER_CLAIM_URL", "Swiggy API endpoint", None),
            var("SWIGGY_DEVICE_ID", "Swiggy device ID", None),
            var("SWIGGY_TID", "Swiggy TID", None),
            var("SWIGGY_TOKEN", "Swiggy auth token", None),
        ],
    ),
    (
        "Gold Charge Card",
        &[
            var("GOLD_CHARGE_CVV", "Gold Charge card CVV", None),
            var("GOLD_CHARGE", "Use Gold Charge card", Some("false")),
        ],
    ),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "default", rename_all = "snake_case")]
pub enum VarStatus {
    Set,
    Defaulted(String),
    Missing,
}

#[derive(Debug, Clone, Serialize)]
pub struct VarCheck {
    pub name: String,
    pub description: String,
    pub required: bool,
    pub status: VarStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
    pub category: String,
    pub required: bool,
    pub vars: Vec<VarCheck>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvReport {
    pub groups: Vec<GroupReport>,
}

impl EnvReport {
    /// No required variable is missing
    pub fn passed(&self) -> bool {
        self.missing_required().is_empty()
    }

    pub fn missing_required(&self) -> Vec<&VarCheck> {
        self.checks()
            .filter(|c| c.required && c.status == VarStatus::Missing)
            .collect()
    }

    /// Optional variables that are unset and have no default
    pub fn warnings(&self) -> usize {
        self.checks()
            .filter(|c| !c.required && c.status == VarStatus::Missing)
            .count()
    }

    fn checks(&self) -> impl Iterator<Item = &VarCheck> {
        self.groups.iter().flat_map(|g| g.vars.iter())
    }
}

/// Check every known variable against `env`
pub fn validate(env: &HashMap<String, String>) -> EnvReport {
    let mut groups = Vec::new();
    for (specs, required) in [(REQUIRED, true), (OPTIONAL, false)] {
        for (category, vars) in specs {
            groups.push(GroupReport {
                category: category.to_string(),
                required,
                vars: vars.iter().map(|spec| check(spec, env, required)).collect(),
            });
        }
    }
    EnvReport { groups }
}

fn check(spec: &VarSpec, env: &HashMap<String, String>, required: bool) -> VarCheck {
    let value = env.get(spec.name).map(|v| v.trim()).unwrap_or("");
    let unset = value.is_empty() || (required && PLACEHOLDERS.contains(&value));

    let status = match (unset, spec.default) {
        (false, _) => VarStatus::Set,
        (true, Some(default)) => VarStatus::Defaulted(default.to_string()),
        (true, None) => VarStatus::Missing,
    };

    VarCheck {
        name: spec.name.to_string(),
        description: spec.description.to_string(),
        required,
        status,
    }
}

/// Process environment overlaid with `env_file` when it exists.
///
/// Entries in the file win over the process environment.
pub fn collect_env(env_file: &Path) -> Result<(HashMap<String, String>, bool)> {
    let mut env: HashMap<String, String> = std::env::vars().collect();
    if !env_file.exists() {
        return Ok((env, false));
    }
    env.extend(read_env_file(env_file)?);
    Ok((env, true))
}
