//! Shell script generation
//!
//! [`render_script`] turns a typed description of a job into the POSIX sh
//! text cron runs. Every script:
//!
//! 1. takes the lock of its storage, aborting when another job holds it
//! 2. sources the storage's environment file
//! 3. runs the tool from the repository root with output in a per-run log
//! 4. optionally mails a status line derived from the exit code
//! 5. releases the lock and exits with the tool's exit code
//!
//! The lock file is created with noclobber set, so two jobs racing for the
//! same storage cannot both succeed. An `EXIT` trap removes it on every path
//! after acquisition. Locks are never expired; a stale lock blocks the
//! storage until someone removes it.

use std::path::Path;

use crate::schedules::{JobKind, StorageBinding};

/// Exit codes of the backup tool and how they are reported
///
/// Codes not listed fall through to an "Unknown" status that quotes the
/// code.
pub const EXIT_CODES: &[(u8, &str, &str)] = &[
    (0, "Success", "See attached log"),
    (1, "Failure", "Interrupted by user. See attached log."),
    (2, "Failure", "Malformed arguments. See attached log."),
    (3, "Failure", "Invalid argument value. See attached log."),
    (100, "Failure", "Runtime error in Duplicacy code. See attached log."),
    (101, "Failure", "Runtime error in an external dependency. See attached log."),
];

/// Where a job's status mail goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification<'a> {
    pub mail_command: &'a str,
    pub recipient: &'a str,
}

/// Everything a script is generated from
#[derive(Debug, Clone, Copy)]
pub struct ScriptParams<'a> {
    pub kind: JobKind,
    pub job_name: &'a str,
    pub binding: &'a StorageBinding,
    pub tool: &'a str,
    pub search_path: &'a str,
    pub repo_dir: &'a Path,
    pub work_dir: &'a Path,
    /// Tool options, rendered one per line in the given order
    pub flags: &'a [String],
    pub notification: Option<Notification<'a>>,
}

/// Render the complete script text
pub fn render_script(params: &ScriptParams<'_>) -> String {
    let mut lines: Vec<String> = vec!["#!/bin/sh".to_string()];

    if *params.binding == StorageBinding::Runtime {
        lines.extend(argument_section());
    }

    lines.extend(constant_section(params));
    lines.push(String::new());
    lines.extend(lock_section());
    lines.push(String::new());
    lines.extend(main_section(params));

    let mut script = lines.join("\n");
    script.push('\n');
    script
}

fn argument_section() -> Vec<String> {
    [
        "#==== Arguments",
        "usage()",
        "{",
        "  echo \"Usage: $0 -i <repo id> -s <storage name>\" >&2",
        "  exit 2",
        "}",
        "",
        "REPO_ID=\"\"",
        "STORAGE_NAME=\"\"",
        "while getopts \"i:s:\" OPTION",
        "do",
        "  case \"${OPTION}\" in",
        "    i) REPO_ID=\"${OPTARG}\" ;;",
        "    s) STORAGE_NAME=\"${OPTARG}\" ;;",
        "    *) usage ;;",
        "  esac",
        "done",
        "",
        "[ -n \"${REPO_ID}\" ] && [ -n \"${STORAGE_NAME}\" ] || usage",
        "",
        "# Both values end up in file names and tool arguments",
        "for VALUE in \"${REPO_ID}\" \"${STORAGE_NAME}\"",
        "do",
        "  case \"${VALUE}\" in",
        "    *[!A-Za-z0-9_-]*) usage ;;",
        "  esac",
        "done",
        "",
    ]
    .iter()
    .map(|line| line.to_string())
    .collect()
}

fn constant_section(params: &ScriptParams<'_>) -> Vec<String> {
    let mut lines = vec![
        "#==== Constants".to_string(),
        format!("PATH=\"{}\"", params.search_path),
    ];

    if let StorageBinding::Fixed(storage) = params.binding {
        lines.push(format!("STORAGE_NAME=\"{storage}\""));
    }

    lines.extend([
        format!("JOB_NAME=\"{}\"", params.job_name),
        "TIMESTAMP=$(date +%Y-%m-%d_%H%M%S)".to_string(),
        String::new(),
        "# Paths".to_string(),
        format!("REPO_DIR=\"{}\"", params.repo_dir.display()),
        format!("WORK_DIR=\"{}\"", params.work_dir.display()),
        "LOCK_DIR=\"${WORK_DIR}/locks\"".to_string(),
        "LOG_DIR=\"${WORK_DIR}/logs\"".to_string(),
        "SCRIPT_DIR=\"${WORK_DIR}/scripts\"".to_string(),
        String::new(),
        "# Config files".to_string(),
        "LOCK_FILE=\"${LOCK_DIR}/${STORAGE_NAME}.lock\"".to_string(),
        "ENV_FILE=\"${SCRIPT_DIR}/${STORAGE_NAME}.env\"".to_string(),
        "LOG_FILE=\"${LOG_DIR}/${JOB_NAME}_${STORAGE_NAME}_${TIMESTAMP}.log\"".to_string(),
    ]);

    lines
}

fn lock_section() -> Vec<String> {
    [
        "#==== Lock handling",
        "release_backup_lock()",
        "{",
        "  rm -f \"${LOCK_FILE}\"",
        "}",
        "",
        "acquire_backup_lock()",
        "{",
        "  # Abort if locked, otherwise capture job name & PID",
        "  if ! ( set -C; echo \"${JOB_NAME}: $$\" > \"${LOCK_FILE}\" ) 2>/dev/null",
        "  then",
        "    echo \"${STORAGE_NAME} is locked!\" >&2",
        "    exit 1",
        "  fi",
        "  trap release_backup_lock EXIT",
        "  trap 'exit 130' INT",
        "  trap 'exit 143' TERM",
        "}",
    ]
    .iter()
    .map(|line| line.to_string())
    .collect()
}

fn main_section(params: &ScriptParams<'_>) -> Vec<String> {
    let mut lines: Vec<String> = [
        "#==== Main Routine",
        "",
        "# Acquire the storage lock for this repo or abort",
        "acquire_backup_lock",
        "",
        "# Retrieve our credentials",
        ". \"${ENV_FILE}\"",
        "",
        "# Move to the root of the repository",
        "cd \"${REPO_DIR}\" || exit 1",
        "",
    ]
    .iter()
    .map(|line| line.to_string())
    .collect();

    lines.push(match params.kind {
        JobKind::Backup => "# Execute the backup".to_string(),
        JobKind::Prune => "# Execute".to_string(),
    });
    lines.extend(invocation(params));
    lines.push(String::new());

    match params.notification {
        Some(notification) => lines.extend(notification_section(params.kind, notification)),
        None => lines.push("RC=\"$?\"".to_string()),
    }

    lines.extend([
        String::new(),
        "# Release the lock".to_string(),
        "release_backup_lock".to_string(),
        String::new(),
        "exit \"${RC}\"".to_string(),
    ]);

    lines
}

/// The tool call, one option per continuation line
fn invocation(params: &ScriptParams<'_>) -> Vec<String> {
    let mut lines = vec![format!("{} -log -background {} \\", params.tool, params.kind.as_str())];
    let redirect = ">\"${LOG_FILE}\" 2>&1";

    match params.flags.split_last() {
        Some((last, rest)) => {
            lines.extend(rest.iter().map(|flag| format!("  {flag} \\")));
            lines.push(format!("  {last} {redirect}"));
        }
        None => lines.push(format!("  {redirect}")),
    }

    lines
}

/// Exit code dispatch table feeding the mail command
fn notification_section(kind: JobKind, notification: Notification<'_>) -> Vec<String> {
    let mut lines = vec![
        "# Notify someone about what happened".to_string(),
        "RC=\"$?\"".to_string(),
        "MESSAGE=\"\"".to_string(),
        "case \"${RC}\" in".to_string(),
    ];

    let rows = EXIT_CODES
        .iter()
        .map(|(code, status, message)| (code.to_string(), *status, *message))
        .chain(std::iter::once((
            "*".to_string(),
            "Unknown",
            "Return code - ${RC}. See attached log.",
        )));

    for (pattern, status, message) in rows {
        lines.push(format!("  {pattern})"));
        lines.push(format!("    STATUS=\"{status}\""));
        lines.push(format!("    MESSAGE=\"{message}\""));
        lines.push("    ;;".to_string());
    }

    lines.push("esac".to_string());
    lines.push(format!(
        "echo \"${{MESSAGE}}\" | {} -s \"Duplicacy {} ${{JOB_NAME}} - ${{STATUS}}\" {} -a \"${{LOG_FILE}}\"",
        notification.mail_command,
        kind.title(),
        notification.recipient
    ));

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params<'a>(
        kind: JobKind,
        binding: &'a StorageBinding,
        flags: &'a [String],
        notification: Option<Notification<'a>>,
    ) -> ScriptParams<'a> {
        ScriptParams {
            kind,
            job_name: "my-repo_default_daily",
            binding,
            tool: "duplicacy",
            search_path: "/usr/local/bin:/usr/bin:/bin",
            repo_dir: Path::new("/backup/dir"),
            work_dir: Path::new("/backup/dir/.duplicacy/dupliplan"),
            flags,
            notification,
        }
    }

    const PLAIN_BACKUP: &str = r#"#!/bin/sh
#==== Constants
PATH="/usr/local/bin:/usr/bin:/bin"
STORAGE_NAME="default"
JOB_NAME="my-repo_default_daily"
TIMESTAMP=$(date +%Y-%m-%d_%H%M%S)

# Paths
REPO_DIR="/backup/dir"
WORK_DIR="/backup/dir/.duplicacy/dupliplan"
LOCK_DIR="${WORK_DIR}/locks"
LOG_DIR="${WORK_DIR}/logs"
SCRIPT_DIR="${WORK_DIR}/scripts"

# Config files
LOCK_FILE="${LOCK_DIR}/${STORAGE_NAME}.lock"
ENV_FILE="${SCRIPT_DIR}/${STORAGE_NAME}.env"
LOG_FILE="${LOG_DIR}/${JOB_NAME}_${STORAGE_NAME}_${TIMESTAMP}.log"

#==== Lock handling
release_backup_lock()
{
  rm -f "${LOCK_FILE}"
}

acquire_backup_lock()
{
  # Abort if locked, otherwise capture job name & PID
  if ! ( set -C; echo "${JOB_NAME}: $$" > "${LOCK_FILE}" ) 2>/dev/null
  then
    echo "${STORAGE_NAME} is locked!" >&2
    exit 1
  fi
  trap release_backup_lock EXIT
  trap 'exit 130' INT
  trap 'exit 143' TERM
}

#==== Main Routine

# Acquire the storage lock for this repo or abort
acquire_backup_lock

# Retrieve our credentials
. "${ENV_FILE}"

# Move to the root of the repository
cd "${REPO_DIR}" || exit 1

# Execute the backup
duplicacy -log -background backup \
  -threads 1 >"${LOG_FILE}" 2>&1

RC="$?"

# Release the lock
release_backup_lock

exit "${RC}"
"#;

    #[test]
    fn test_plain_backup_script() {
        let binding = StorageBinding::Fixed("default".into());
        let flags = vec!["-threads 1".to_string()];
        let script = render_script(&params(JobKind::Backup, &binding, &flags, None));

        assert_eq!(script, PLAIN_BACKUP);
    }

    #[test]
    fn test_notification_block() {
        let binding = StorageBinding::Fixed("default".into());
        let flags = vec!["-threads 8".to_string()];
        let notification = Notification {
            mail_command: "mutt",
            recipient: "user@example.com",
        };
        let script = render_script(&params(JobKind::Backup, &binding, &flags, Some(notification)));

        assert!(script.contains(
            "# Notify someone about what happened\n\
             RC=\"$?\"\n\
             MESSAGE=\"\"\n\
             case \"${RC}\" in\n  \
             0)\n    \
             STATUS=\"Success\"\n    \
             MESSAGE=\"See attached log\"\n    \
             ;;\n"
        ));
        assert!(script.contains(
            "  100)\n    STATUS=\"Failure\"\n    MESSAGE=\"Runtime error in Duplicacy code. See attached log.\"\n"
        ));
        assert!(script.contains(
            "  *)\n    STATUS=\"Unknown\"\n    MESSAGE=\"Return code - ${RC}. See attached log.\"\n    ;;\nesac\n"
        ));
        assert!(script.contains(
            "echo \"${MESSAGE}\" | mutt -s \"Duplicacy Backup ${JOB_NAME} - ${STATUS}\" user@example.com -a \"${LOG_FILE}\"\n"
        ));
        assert_eq!(script.matches("RC=\"$?\"").count(), 1);
        assert!(script.ends_with("release_backup_lock\n\nexit \"${RC}\"\n"));
    }

    #[test]
    fn test_prune_invocation_lines() {
        let binding = StorageBinding::Fixed("other_bucket".into());
        let flags: Vec<String> = ["-keep 0:30", "-storage other_bucket", "-t daily", "-exhaustive", "-threads 2"]
            .iter()
            .map(|flag| flag.to_string())
            .collect();
        let notification = Notification {
            mail_command: "mutt",
            recipient: "user@example.com",
        };
        let script = render_script(&params(JobKind::Prune, &binding, &flags, Some(notification)));

        assert!(script.contains("\nSTORAGE_NAME=\"other_bucket\"\n"));
        assert!(script.contains(
            "# Execute\nduplicacy -log -background prune \\\n  \
             -keep 0:30 \\\n  \
             -storage other_bucket \\\n  \
             -t daily \\\n  \
             -exhaustive \\\n  \
             -threads 2 >\"${LOG_FILE}\" 2>&1\n"
        ));
        assert!(script.contains("-s \"Duplicacy Prune ${JOB_NAME} - ${STATUS}\""));
    }

    #[test]
    fn test_runtime_binding_parses_arguments() {
        let binding = StorageBinding::Runtime;
        let flags = vec!["-threads 1".to_string()];
        let script = render_script(&params(JobKind::Prune, &binding, &flags, None));

        assert!(script.starts_with("#!/bin/sh\n#==== Arguments\n"));
        assert!(script.contains("while getopts \"i:s:\" OPTION\n"));
        assert!(!script.contains("STORAGE_NAME=\"default\""));

        let arguments = script.find("#==== Arguments").unwrap();
        let constants = script.find("#==== Constants").unwrap();
        assert!(arguments < constants);
    }

    #[test]
    fn test_lock_is_released_on_every_path() {
        let binding = StorageBinding::Fixed("default".into());
        let flags = vec!["-threads 1".to_string()];
        let script = render_script(&params(JobKind::Backup, &binding, &flags, None));

        // The trap is only installed once the lock is ours
        let acquire = script.find("set -C").unwrap();
        let trap = script.find("trap release_backup_lock EXIT").unwrap();
        assert!(acquire < trap);
    }
}
