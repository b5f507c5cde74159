//! dcc-validate CLI - business-rule validation of Digital Covid Certificates.
//!
//! Validates a decoded certificate against the rules published for an
//! arrival country, and inspects the packages the distribution service
//! publishes.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use dcc_validation_core::{
    HealthCertificate, HealthCertificateValidationReport, RuleCategory, RuleOutcome,
    ValidationConfig, ValidationOrchestrator,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// dcc-validate - business-rule validation for EU Digital Covid Certificates.
#[derive(Parser)]
#[command(name = "dcc-validate")]
#[command(version = VERSION)]
#[command(about = "Business-rule validation for EU Digital Covid Certificates")]
#[command(long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Distribution service base URL
    #[arg(long)]
    endpoint: Option<String>,

    /// Directory for cached packages (memory only when omitted)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Hex-encoded P-256 public key trusted to sign packages (repeatable)
    #[arg(long = "trust-anchor")]
    trust_anchors: Vec<String>,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Value-set language
    #[arg(long, default_value = "en")]
    language: String,

    /// Serve cached packages when the service is unreachable
    #[arg(long)]
    offline_fallback: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a decoded certificate (JSON) for an arrival country
    Validate {
        /// Path to the certificate JSON
        #[arg(long)]
        certificate: PathBuf,

        /// Arrival country (ISO 3166 alpha-2)
        #[arg(long)]
        country: String,

        /// Validation instant (RFC 3339); now when omitted
        #[arg(long)]
        clock: Option<String>,
    },

    /// List onboarded countries
    Countries,

    /// List the rules of a category
    Rules {
        /// Rule category
        #[arg(long, value_enum)]
        category: CategoryArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CategoryArg {
    Acceptance,
    Invalidation,
    BoosterNotification,
}

impl From<CategoryArg> for RuleCategory {
    fn from(arg: CategoryArg) -> Self {
        match arg {
            CategoryArg::Acceptance => RuleCategory::Acceptance,
            CategoryArg::Invalidation => RuleCategory::Invalidation,
            CategoryArg::BoosterNotification => RuleCategory::BoosterNotification,
        }
    }
}

impl Cli {
    fn config(&self) -> ValidationConfig {
        let defaults = ValidationConfig::default();
        ValidationConfig {
            endpoint: self.endpoint.clone().unwrap_or(defaults.endpoint),
            timeout: Duration::from_secs(self.timeout),
            cache_dir: self.cache_dir.clone(),
            trust_anchors: self.trust_anchors.clone(),
            value_set_language: self.language.clone(),
            offline_fallback: self.offline_fallback,
        }
    }
}

fn fail(json: bool, code: &str, message: &str) -> ExitCode {
    if json {
        let output = serde_json::json!({ "error": code, "message": message });
        println!("{}", output);
    } else {
        eprintln!("error: {} ({})", message, code);
    }
    ExitCode::FAILURE
}

fn print_report(report: &HealthCertificateValidationReport) {
    println!("\nVALIDATION RESULT: {}", report.status().to_uppercase());
    println!("======================\n");
    if report.results().is_empty() {
        println!("  No applicable rules.");
    }
    for result in report.results() {
        let marker = match result.outcome {
            RuleOutcome::Passed => "PASS",
            RuleOutcome::Open => "OPEN",
            RuleOutcome::Failed => "FAIL",
        };
        let description = result.rule.description_for("en").unwrap_or("");
        println!("  [{}] {} {}", marker, result.rule_identifier(), description);
        if let Some(detail) = &result.detail {
            println!("         {}", detail);
        }
    }
}

async fn run_validate(
    engine: &ValidationOrchestrator,
    certificate: &Path,
    country: &str,
    clock: Option<&str>,
    json: bool,
) -> ExitCode {
    let raw = match std::fs::read(certificate) {
        Ok(raw) => raw,
        Err(e) => return fail(json, "CERTIFICATE_UNREADABLE", &e.to_string()),
    };
    let certificate: HealthCertificate = match serde_json::from_slice(&raw) {
        Ok(certificate) => certificate,
        Err(e) => return fail(json, "CERTIFICATE_INVALID", &e.to_string()),
    };
    let clock = match clock {
        Some(clock) => match DateTime::parse_from_rfc3339(clock) {
            Ok(clock) => clock.with_timezone(&Utc),
            Err(e) => return fail(json, "CLOCK_INVALID", &e.to_string()),
        },
        None => Utc::now(),
    };

    match engine
        .validate(&certificate, &country.to_ascii_uppercase(), clock)
        .await
    {
        Ok(report) => {
            if json {
                match serde_json::to_string_pretty(&report) {
                    Ok(output) => println!("{}", output),
                    Err(e) => return fail(json, "OUTPUT_ERROR", &e.to_string()),
                }
            } else {
                print_report(&report);
            }
            if report.is_passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            }
        },
        Err(e) => fail(json, &e.code(), &e.to_string()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let json_output = cli.format == "json";

    // Initialize logging (suppress for JSON output)
    if json_output {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::ERROR)
            .with_target(false)
            .init();
    } else if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_target(false)
            .init();
    }

    let engine = match ValidationOrchestrator::with_config(cli.config()) {
        Ok(engine) => engine,
        Err(e) => return fail(json_output, "CONFIG_ERROR", &e.to_string()),
    };

    match &cli.command {
        Commands::Validate {
            certificate,
            country,
            clock,
        } => run_validate(&engine, certificate, country, clock.as_deref(), json_output).await,
        Commands::Countries => match engine.onboarded_countries().await {
            Ok(countries) => {
                if json_output {
                    println!("{}", serde_json::json!({ "countries": countries }));
                } else {
                    println!("{}", countries.join(" "));
                }
                ExitCode::SUCCESS
            },
            Err(e) => fail(json_output, &e.code(), &e.to_string()),
        },
        Commands::Rules { category } => {
            let category = RuleCategory::from(*category);
            match engine.rules(category).await {
                Ok(rules) => {
                    if json_output {
                        let output = serde_json::json!({
                            "category": category.to_string(),
                            "rules": rules,
                        });
                        println!("{}", output);
                    } else {
                        println!("\n{} RULES ({})", category.to_string().to_uppercase(), rules.len());
                        for rule in &rules {
                            println!(
                                "  {} v{} [{}] valid {} .. {}",
                                rule.identifier,
                                rule.version,
                                rule.country_code,
                                rule.valid_from.to_rfc3339(),
                                rule.valid_to.to_rfc3339()
                            );
                        }
                    }
                    ExitCode::SUCCESS
                },
                Err(e) => fail(json_output, &e.code(), &e.to_string()),
            }
        },
    }
}
