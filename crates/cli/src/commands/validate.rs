//! Environment validation command

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use vouchflow_common::envcheck::{self, EnvReport, VarCheck, VarStatus};

use crate::output::{
    print_banner, print_error, print_info, print_list, print_success, print_warning, OutputFormat, TableDisplay,
};

/// One variable in the report, flattened for table and JSON output
#[derive(Serialize)]
pub struct VarDisplay {
    pub category: String,
    pub name: String,
    pub required: bool,
    pub status: String,
    pub description: String,
}

impl VarDisplay {
    fn new(category: &str, check: &VarCheck) -> Self {
        let status = match &check.status {
            VarStatus::Set => "set".to_string(),
            VarStatus::Defaulted(default) => format!("default ({})", default),
            VarStatus::Missing => "missing".to_string(),
        };
        Self {
            category: category.to_string(),
            name: check.name.clone(),
            required: check.required,
            status,
            description: check.description.clone(),
        }
    }
}

impl TableDisplay for VarDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Category", "Variable", "Required", "Status", "Description"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.category.clone(),
            self.name.clone(),
            if self.required { "yes" } else { "no" }.to_string(),
            self.status.clone(),
            self.description.clone(),
        ]
    }
}

/// Validate the environment; returns whether every required variable is set
pub fn execute(env_file: &Path, format: OutputFormat) -> Result<bool> {
    let (env, loaded) = envcheck::collect_env(env_file)?;
    let report = envcheck::validate(&env);

    match format {
        OutputFormat::Table => {
            let rows: Vec<VarDisplay> = report
                .groups
                .iter()
                .flat_map(|g| g.vars.iter().map(move |v| VarDisplay::new(&g.category, v)))
                .collect();
            if !loaded {
                print_warning(&format!("{} not found, using process environment only", env_file.display()));
            }
            print_list(&rows, format);
            print_summary(&report);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Plain => print_plain(&report, loaded, env_file),
    }

    Ok(report.passed())
}

fn print_plain(report: &EnvReport, loaded: bool, env_file: &Path) {
    if !loaded {
        print_warning(&format!("{} not found, using process environment only", env_file.display()));
    }
    print_banner("Environment Variables Validation");

    for group in &report.groups {
        let title = if group.required {
            format!("{}:", group.category)
        } else {
            format!("{} (Optional):", group.category)
        };
        println!("\n{}", title.blue());

        for var in &group.vars {
            match (&var.status, var.required) {
                (VarStatus::Set, _) => print_success(&format!("{}: Set", var.name)),
                (VarStatus::Defaulted(default), true) => {
                    print_warning(&format!("{}: Using default value \"{}\"", var.name, default))
                }
                (VarStatus::Defaulted(default), false) => {
                    print_info(&format!("{}: Using default \"{}\"", var.name, default))
                }
                (VarStatus::Missing, true) => print_error(&format!("{}: Missing! ({})", var.name, var.description)),
                (VarStatus::Missing, false) => {
                    print_warning(&format!("{}: Not set ({})", var.name, var.description))
                }
            }
        }
    }

    println!();
    print_banner("Validation Summary");
    print_summary(report);
}

fn print_summary(report: &EnvReport) {
    let warnings = report.warnings();
    if !report.passed() {
        print_error("Validation FAILED: Missing required environment variables");
        println!("\n{}", "Fix these issues before deployment:".yellow());
        println!("1. Copy example.env to .env");
        println!("2. Fill in all required values");
        println!("3. Run `vouchflow validate` again");
    } else if warnings > 0 {
        print_warning(&format!("Validation PASSED with {} warning(s)", warnings));
        println!("\n{}", "Optional features may not work without these variables:".yellow());
        println!("- Swiggy auto-claim requires SWIGGY_* variables");
        println!("- Gold Charge card requires GOLD_CHARGE_CVV");
    } else {
        print_success("Validation PASSED! All required variables are set");
        println!("\n{}", "Ready for deployment!".green());
    }
}
