//! testmend - Self-healing UI test execution
//!
//! Command-line front end for offline work on recorded runs: diagnose a
//! saved handoff record, classify an error message, inspect configuration.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use testmend::artifacts::{ArtifactSink, FsArtifactSink, MemoryArtifactSink};
use testmend::diagnosis::{Diagnoser, Priority, RunDiagnosis, Severity};
use testmend::fixes::{FixKind, FixRegistry};
use testmend::handoff::{FailureEntry, HandoffRecord};
use testmend::retry::RetryClass;
use testmend::{MendConfig, MendError, Result};

#[derive(Parser)]
#[command(name = "testmend")]
#[command(version)]
#[command(about = "Self-healing UI test execution: diagnose failures and generate fixes", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Configuration file (defaults to .testmend/settings.json in the project)
    #[arg(short, long, global = true, env = "TESTMEND_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Diagnose a recorded handoff file
    Diagnose {
        /// Path to the handoff JSON
        handoff: PathBuf,

        /// Output the run diagnosis as JSON
        #[arg(long)]
        json: bool,

        /// Write generated fix scripts to the configured artifact directory
        #[arg(long)]
        write_fixes: bool,
    },

    /// Classify an error message the way the pipeline would
    Classify {
        /// The error message (and optionally stack) to classify
        message: String,

        /// Test name used for severity rules
        #[arg(short, long, default_value = "adhoc")]
        test_name: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate the configuration file
    Validate,

    /// Show configuration paths
    Paths,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "testmend=debug,info"
    } else {
        "testmend=info,warn"
    };

    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    // Resolve project path
    let project_path = cli.project.canonicalize().unwrap_or(cli.project.clone());

    if !project_path.exists() {
        eprintln!(
            "{} Project directory does not exist: {}",
            "Error:".red().bold(),
            project_path.display()
        );
        std::process::exit(1);
    }

    if let Err(e) = run(cli, &project_path) {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(e.exit_code());
    }
}

fn load_config(explicit: Option<&Path>, project_path: &Path) -> Result<MendConfig> {
    match explicit {
        Some(path) => MendConfig::load_file(path),
        None => MendConfig::load(project_path),
    }
}

fn run(cli: Cli, project_path: &Path) -> Result<()> {
    match cli.command {
        Commands::Diagnose {
            handoff,
            json,
            write_fixes,
        } => {
            let config = load_config(cli.config.as_deref(), project_path)?;
            let record = HandoffRecord::load(&handoff)?;

            let sink: Arc<dyn ArtifactSink> = if write_fixes {
                Arc::new(FsArtifactSink::new(MendConfig::resolve_path(
                    project_path,
                    &config.fixes.artifact_dir,
                )))
            } else {
                Arc::new(MemoryArtifactSink::new())
            };

            let diagnoser = Diagnoser::from_config(&config);
            let report = diagnoser.analyze_handoff(&record, &FixRegistry::new(sink));

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report, write_fixes);
            }
        }

        Commands::Classify {
            message,
            test_name,
            json,
        } => {
            let config = load_config(cli.config.as_deref(), project_path)?;
            let diagnosis = Diagnoser::from_config(&config)
                .diagnose_failure(&FailureEntry::new(&test_name, &message));
            let class = RetryClass::classify(&message);
            let schedule: Vec<u64> = config
                .backoff_for(class)
                .schedule(config.retry.max_retries.saturating_sub(1))
                .iter()
                .map(|d| d.as_millis() as u64)
                .collect();
            let fix = FixKind::for_diagnosis(&diagnosis);

            if json {
                let value = serde_json::json!({
                    "category": diagnosis.category,
                    "severity": diagnosis.severity,
                    "rootCause": diagnosis.root_cause,
                    "suggestedFix": diagnosis.suggested_fix,
                    "retryClass": class,
                    "backoffMs": schedule,
                    "fix": fix,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("\n{} {}", "Classify:".cyan().bold(), message);
                println!("{}", "─".repeat(40));
                println!("   Category: {}", diagnosis.category.to_string().bold());
                println!("   Severity: {}", colored_severity(diagnosis.severity));
                println!("   Root cause: {}", diagnosis.root_cause);
                println!("   Suggested fix: {}", diagnosis.suggested_fix);
                println!("   Retry class: {}", class);
                println!(
                    "   Backoff (ms): {}",
                    schedule
                        .iter()
                        .map(u64::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                match fix {
                    Some(kind) => println!("   Fix: {:?}", kind),
                    None => println!("   Fix: {}", "none available".dimmed()),
                }
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Show { json } => {
                let config = load_config(cli.config.as_deref(), project_path)?;

                if json {
                    println!("{}", serde_json::to_string_pretty(&config)?);
                } else {
                    println!("\n{} testmend Configuration", "Config:".cyan().bold());
                    println!("{}", "─".repeat(40));
                    println!("   Max retries: {}", config.retry.max_retries);
                    println!(
                        "   Resolved failures: {:?}",
                        config.retry.resolved_failures
                    );
                    for class in RetryClass::all() {
                        let strategy = config.backoff_for(class);
                        println!(
                            "   Backoff {}: {}ms x{}",
                            class, strategy.wait_ms, strategy.multiplier
                        );
                    }
                    println!("   Settle delay: {}ms", config.suite.settle_delay_ms);
                    println!("   Retry failed tests: {}", config.suite.retry_failed_tests);
                    println!("   Auto-apply fixes: {}", config.fixes.auto_apply);
                    println!("   Fix timeout: {}ms", config.fixes.fix_timeout_ms);
                    println!("   Persist diagnoses: {}", config.diagnosis.persist);
                }
            }

            ConfigAction::Validate => {
                let settings_path = cli
                    .config
                    .clone()
                    .unwrap_or_else(|| MendConfig::settings_path(project_path));

                if !settings_path.exists() {
                    println!(
                        "{} {} not found (using defaults)",
                        "Info:".blue(),
                        settings_path.display()
                    );
                    return Ok(());
                }

                let config = MendConfig::load_file(&settings_path)?;
                let problems = config.validate();
                if problems.is_empty() {
                    println!(
                        "{} {} is valid",
                        "OK".green(),
                        settings_path.display()
                    );
                } else {
                    for problem in &problems {
                        eprintln!("{} {}", "Invalid:".red(), problem);
                    }
                    return Err(MendError::InvalidConfig {
                        field: settings_path.display().to_string(),
                        reason: format!("{} problem(s) found", problems.len()),
                    });
                }
            }

            ConfigAction::Paths => {
                let config = load_config(cli.config.as_deref(), project_path)?;
                println!("\n{} Configuration Paths", "Config:".cyan().bold());
                println!("{}", "─".repeat(40));
                println!(
                    "   Settings: {}",
                    MendConfig::settings_path(project_path).display()
                );
                println!(
                    "   Fix scripts: {}",
                    MendConfig::resolve_path(project_path, &config.fixes.artifact_dir).display()
                );
                println!(
                    "   Diagnoses: {}",
                    MendConfig::resolve_path(project_path, &config.diagnosis.store_dir).display()
                );
            }
        },
    }

    Ok(())
}

fn colored_severity(severity: Severity) -> colored::ColoredString {
    match severity {
        Severity::Critical => severity.to_string().red().bold(),
        Severity::High => severity.to_string().red(),
        Severity::Medium => severity.to_string().yellow(),
        Severity::Low => severity.to_string().dimmed(),
    }
}

fn print_report(report: &RunDiagnosis, wrote_fixes: bool) {
    let summary = &report.summary;
    println!("\n{} {}", "Diagnosis:".cyan().bold(), report.handoff_id);
    println!("{}", "─".repeat(40));
    println!(
        "   Tests: {} total, {} passed, {} failed",
        summary.total,
        summary.passed.to_string().green(),
        summary.failed.to_string().red()
    );
    println!("   Duration: {}ms", summary.duration);
    println!("   Flakiness: {:.2}", summary.flakiness);

    if report.issues.is_empty() {
        println!("\n{} No open issues", "OK".green());
        return;
    }

    println!("\n{} ({})", "Issues".bold(), report.issues.len());
    for issue in &report.issues {
        println!(
            "   [{}] {} - {}: {}",
            colored_severity(issue.severity),
            issue.test_name,
            issue.category,
            issue.root_cause
        );
        println!("      {} {}", "→".dimmed(), issue.suggested_fix);
    }

    if !report.recommendations.is_empty() {
        println!("\n{}", "Recommendations".bold());
        for rec in &report.recommendations {
            let priority = match rec.priority {
                Priority::Immediate => "immediate".red().bold(),
                Priority::High => "high".red(),
                Priority::Medium => "medium".yellow(),
                Priority::Low => "low".normal(),
            };
            println!("   [{}] {} ({:?} effort)", priority, rec.title, rec.effort);
            println!("      {}", rec.strategy);
            println!("      Affects: {}", rec.affected_tests.join(", "));
        }
    }

    if !report.fix_scripts.is_empty() {
        println!("\n{}", "Fixes".bold());
        for fix in &report.fix_scripts {
            let mode = if fix.can_auto_apply() {
                "auto".green()
            } else if fix.requires_review {
                "review".yellow()
            } else {
                "manual".blue()
            };
            println!("   [{}] {} - {}", mode, fix.test_name, fix.description);
            if wrote_fixes {
                if let Some(path) = &fix.path {
                    println!("      Script: {}", path);
                }
            }
            for step in &fix.manual_steps {
                println!("      - {}", step);
            }
        }
    }
}
