// dupliplan - compile a Duplicacy backup plan into materializable artifacts
// Prints the dependency graph, or views of it, on stdout

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dupliplan_common::{
    Artifact, ArtifactKind, CompileOutcome, PlanConfig, compile_plan, default_config_path,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the plan file (default: $DUPLIPLAN_CONFIG or /etc/dupliplan/plan.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Compile only these repositories, replacing the plan's selection
    #[arg(short, long = "repo", value_name = "NAME")]
    repos: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the plan and summarize what it produces
    Check,

    /// Print the ordered artifact plan as JSON
    Plan {
        /// Write the plan to a file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// List artifacts in application order with their requirements
    Order,

    /// Print the generated crontab lines
    Crontab,

    /// Print one generated script
    Script {
        /// Job name (e.g. my-repo_default_daily) or script artifact name
        name: String,
    },
}

fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match run(&cli) {
        Ok(output) => {
            print!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<String> {
    let outcome = compile(cli)?;

    match &cli.command {
        Command::Check => Ok(check_command(&outcome)),
        Command::Plan { output } => plan_command(&outcome, output.as_deref()),
        Command::Order => order_command(&outcome),
        Command::Crontab => crontab_command(&outcome),
        Command::Script { name } => script_command(&outcome, name),
    }
}

/// Load the plan, layer settings and compile
fn compile(cli: &Cli) -> Result<CompileOutcome> {
    let path = cli.config.clone().unwrap_or_else(default_config_path);
    log::debug!("Plan file: {}", path.display());

    let mut config = PlanConfig::load_from_file(&path)?;
    if !cli.repos.is_empty() {
        config.selected = Some(cli.repos.clone());
    }

    // File settings first, environment on top
    let settings = config.settings.clone().with_env_overrides();

    compile_plan(&config, &settings)
        .with_context(|| format!("Failed to compile plan {}", path.display()))
}

fn check_command(outcome: &CompileOutcome) -> String {
    let mut output = format!(
        "Compiled {} repositories: {}\n",
        outcome.compiled.len(),
        outcome.compiled.join(", ")
    );

    for kind in ArtifactKind::ALL {
        output.push_str(&format!("  {:<10} {}\n", kind.as_str(), outcome.graph.count(kind)));
    }

    if !outcome.skipped.is_empty() {
        output.push_str(&format!("Skipped undeclared: {}\n", outcome.skipped.join(", ")));
    }

    output
}

fn plan_command(outcome: &CompileOutcome, output: Option<&Path>) -> Result<String> {
    let mut json = outcome.graph.plan()?.to_json().context("Failed to serialize plan")?;
    json.push('\n');

    match output {
        Some(path) => {
            std::fs::write(path, &json)
                .with_context(|| format!("Failed to write plan to {}", path.display()))?;
            log::info!("Wrote {} artifacts to {}", outcome.graph.len(), path.display());
            Ok(String::new())
        }
        None => Ok(json),
    }
}

fn order_command(outcome: &CompileOutcome) -> Result<String> {
    let graph = &outcome.graph;
    let mut output = String::new();

    for (index, key) in graph.topological_order()?.into_iter().enumerate() {
        let requires = graph.requirements(key);
        if requires.is_empty() {
            output.push_str(&format!("{:>4}. {key}\n", index + 1));
        } else {
            let names: Vec<String> = requires.iter().map(|k| k.to_string()).collect();
            output.push_str(&format!(
                "{:>4}. {key} (requires {})\n",
                index + 1,
                names.join(", ")
            ));
        }
    }

    Ok(output)
}

fn crontab_command(outcome: &CompileOutcome) -> Result<String> {
    let graph = &outcome.graph;
    let mut output = String::new();

    for key in graph.topological_order()? {
        if let Some(Artifact::CronEntry(spec)) = graph.get(key) {
            output.push_str(&format!("# {}\n{}\n", key.name, spec.crontab_line()));
        }
    }

    Ok(output)
}

fn script_command(outcome: &CompileOutcome, name: &str) -> Result<String> {
    let candidates = [
        name.to_string(),
        format!("backup-script_{name}"),
        format!("prune-script_{name}"),
    ];

    candidates
        .iter()
        .find_map(|candidate| match outcome.graph.find(ArtifactKind::File, candidate) {
            Some(Artifact::File(spec)) if candidate.contains("-script_") => spec.content.clone(),
            _ => None,
        })
        .with_context(|| format!("No generated script named '{name}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const PLAN: &str = r#"
[repositories.my-repo]
repo_path = "/my/backup/dir"
filter_rules = ["+foo/baz/*", "-*"]

[repositories.my-repo.storage_targets.default]
target = { url = "b2://my-bucket", b2_id = "my-id", b2_app_key = "my-key" }
encryption = { password = "batman" }

[repositories.my-repo.backup_schedules.daily]
cron_entry = { hour = 1, minute = 30 }
threads = 8
email_recipient = "me@example.com"

[repositories.my-repo.prune_schedules.sweep]
keep_ranges = [{ interval = 0, min_age = 30 }]

[repositories.my-repo.prune_schedules.sweep.schedules.main]
cron_entry = { weekday = 0, hour = 3 }
"#;

    fn plan_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn run_with(file: &NamedTempFile, args: &[&str]) -> Result<String> {
        let path = file.path().to_str().unwrap();
        let mut argv = vec!["dupliplan", "--config", path];
        argv.extend_from_slice(args);
        run(&Cli::try_parse_from(argv).unwrap())
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_check() {
        let file = plan_file(PLAN);
        let output = run_with(&file, &["check"]).unwrap();

        assert!(output.starts_with("Compiled 1 repositories: my-repo\n"));
        assert!(output.contains("  directory  5\n"));
        assert!(output.contains("  cron       2\n"));
        assert!(!output.contains("Skipped"));
    }

    #[test]
    fn test_check_reports_skipped_repositories() {
        let file = plan_file(PLAN);
        let output = run_with(&file, &["--repo", "ghost", "check"]).unwrap();

        assert!(output.starts_with("Compiled 0 repositories"));
        assert!(output.contains("Skipped undeclared: ghost\n"));
    }

    #[test]
    fn test_plan_json() {
        let file = plan_file(PLAN);
        let output = run_with(&file, &["plan"]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();

        let steps = value["steps"].as_array().unwrap();
        assert_eq!(steps[0]["artifact"]["kind"], "directory");
        assert!(
            steps
                .iter()
                .any(|step| step["key"] == "exec[init_my-repo]")
        );
    }

    #[test]
    fn test_plan_written_to_file() {
        let file = plan_file(PLAN);
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("plan.json");

        let output = run_with(&file, &["plan", "--output", target.to_str().unwrap()]).unwrap();
        assert!(output.is_empty());

        let written = std::fs::read_to_string(&target).unwrap();
        assert!(written.contains("\"steps\""));
    }

    #[test]
    fn test_order() {
        let file = plan_file(PLAN);
        let output = run_with(&file, &["order"]).unwrap();
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(lines[0], "   1. directory[/my/backup/dir/.duplicacy]");
        assert!(
            output.contains("exec[init_my-repo] (requires file[env_my-repo_default])")
        );
    }

    #[test]
    fn test_crontab() {
        let file = plan_file(PLAN);
        let output = run_with(&file, &["crontab"]).unwrap();

        assert!(output.contains(
            "# backup-cron_my-repo_default_daily\n\
             30 1 * * * root /my/backup/dir/.duplicacy/dupliplan/scripts/backup_my-repo_default_daily.sh\n"
        ));
        assert!(output.contains(
            "* 3 * * 0 root /my/backup/dir/.duplicacy/dupliplan/scripts/prune_my-repo_sweep.sh -i my-repo -s default\n"
        ));
    }

    #[test]
    fn test_script() {
        let file = plan_file(PLAN);

        let backup = run_with(&file, &["script", "my-repo_default_daily"]).unwrap();
        assert!(backup.starts_with("#!/bin/sh\n"));
        assert!(backup.contains("JOB_NAME=\"my-repo_default_daily\""));

        let prune = run_with(&file, &["script", "prune-script_my-repo_sweep"]).unwrap();
        assert!(prune.contains("#==== Arguments"));

        assert!(run_with(&file, &["script", "filters_my-repo"]).is_err());
        assert!(run_with(&file, &["script", "nope"]).is_err());
    }

    #[test]
    fn test_compile_errors_are_reported() {
        let file = plan_file(&PLAN.replace("email_recipient = \"me@example.com\"", "email_recipient = \"batman\""));
        let err = run_with(&file, &["check"]).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid email address: batman"));
    }

    #[test]
    fn test_missing_plan_file() {
        let cli = Cli::try_parse_from(["dupliplan", "--config", "/nonexistent/plan.toml", "check"]).unwrap();
        let err = run(&cli).unwrap_err();
        assert!(err.to_string().starts_with("Failed to read plan file"));
    }
}
