//! Parsers for SLURM command output.

use crate::batch::slurm::adapter::{SlurmJobInfo, SlurmState};
use crate::error::{SchedError, SchedResult};

/// Parse sbatch output to extract job ID.
///
/// sbatch output format: "Submitted batch job 12345"
pub fn parse_sbatch_output(output: &str) -> SchedResult<String> {
    let trimmed = output.trim();

    if let Some(rest) = trimmed.strip_prefix("Submitted batch job ") {
        let job_id = rest.trim();
        if !job_id.is_empty() && job_id.chars().all(|c| c.is_ascii_digit()) {
            return Ok(job_id.to_string());
        }
    }

    Err(SchedError::SlurmCommandError {
        command: "sbatch".to_string(),
        message: format!("Unexpected output format: {}", trimmed),
    })
}

/// Parse `scontrol show job <id>` output.
///
/// The output is whitespace-separated `Key=Value` tokens spread over several
/// lines:
/// ```text
/// JobId=12345 JobName=climo_1_5
///    UserId=user(1000) GroupId=user(1000) MCS_label=N/A
///    JobState=RUNNING Reason=None Dependency=(null)
///    ExitCode=0:0
/// ```
/// Returns `None` when no `JobState` token is present.
pub fn parse_scontrol_output(output: &str) -> Option<SlurmJobInfo> {
    let mut job_id = None;
    let mut name = String::new();
    let mut state = None;
    let mut reason = None;
    let mut exit_code = None;

    for token in output.split_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        match key {
            "JobId" => job_id = Some(value.to_string()),
            "JobName" => name = value.to_string(),
            "JobState" => state = Some(parse_slurm_state(value)),
            "Reason" if value != "None" => reason = Some(value.to_string()),
            "ExitCode" => exit_code = parse_exit_code(value),
            _ => {}
        }
    }

    Some(SlurmJobInfo {
        job_id: job_id.unwrap_or_default(),
        name,
        state: state?,
        reason,
        exit_code,
    })
}

/// Whether stderr from `scontrol` says the controller no longer knows the job.
pub fn is_unknown_job_error(stderr: &str) -> bool {
    stderr.contains("Invalid job id")
}

/// Parse sacct output for completed job information.
///
/// Expected format (from `sacct -j <id> -o JobID,JobName,State,ExitCode -P`):
/// JobID|JobName|State|ExitCode
/// 12345|job_name|COMPLETED|0:0
/// 12345.batch|batch|COMPLETED|0:0
pub fn parse_sacct_output(output: &str) -> SchedResult<Option<SlurmJobInfo>> {
    let lines: Vec<&str> = output.lines().collect();

    // Skip header line
    if lines.len() < 2 {
        return Ok(None);
    }

    for line in &lines[1..] {
        let parts: Vec<&str> = line.split('|').collect();
        if parts.len() < 4 {
            continue;
        }

        let job_id = parts[0].trim();
        // Skip job steps (e.g., "12345.batch", "12345.extern")
        if job_id.contains('.') {
            continue;
        }

        return Ok(Some(SlurmJobInfo {
            job_id: job_id.to_string(),
            name: parts[1].trim().to_string(),
            state: parse_slurm_state(parts[2].trim()),
            reason: None,
            exit_code: parse_exit_code(parts[3].trim()),
        }));
    }

    Ok(None)
}

/// Parse SLURM state string.
///
/// sacct reports cancellations as `CANCELLED by <uid>`; only the first word
/// is significant.
pub fn parse_slurm_state(state: &str) -> SlurmState {
    let word = state.split_whitespace().next().unwrap_or("");
    match word.to_uppercase().as_str() {
        "PENDING" | "PD" => SlurmState::Pending,
        "RUNNING" | "R" => SlurmState::Running,
        "COMPLETING" | "CG" => SlurmState::Completing,
        "COMPLETED" | "CD" => SlurmState::Completed,
        "FAILED" | "F" => SlurmState::Failed,
        "TIMEOUT" | "TO" => SlurmState::Timeout,
        "CANCELLED" | "CA" => SlurmState::Cancelled,
        "NODE_FAIL" | "NF" => SlurmState::NodeFail,
        "PREEMPTED" | "PR" => SlurmState::Preempted,
        "OUT_OF_MEMORY" | "OOM" => SlurmState::OutOfMemory,
        _ => SlurmState::Unknown(state.to_string()),
    }
}

/// Parse exit code from SLURM format "exit_code:signal".
fn parse_exit_code(code: &str) -> Option<i32> {
    code.split(':').next().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sbatch_output() {
        assert_eq!(parse_sbatch_output("Submitted batch job 12345\n").unwrap(), "12345");
        assert_eq!(parse_sbatch_output("Submitted batch job 9999999").unwrap(), "9999999");
        assert!(parse_sbatch_output("sbatch: error: Batch job submission failed").is_err());
    }

    #[test]
    fn test_parse_scontrol_output() {
        let output = "JobId=12345 JobName=climo_1_5\n   UserId=user(1000) GroupId=user(1000)\n   \
                      JobState=RUNNING Reason=None Dependency=(null)\n   ExitCode=0:0\n";
        let info = parse_scontrol_output(output).unwrap();
        assert_eq!(info.job_id, "12345");
        assert_eq!(info.name, "climo_1_5");
        assert_eq!(info.state, SlurmState::Running);
        assert!(info.reason.is_none());
        assert_eq!(info.exit_code, Some(0));

        let output = "JobId=7 JobName=amwg JobState=PENDING Reason=Priority ExitCode=0:0";
        let info = parse_scontrol_output(output).unwrap();
        assert_eq!(info.state, SlurmState::Pending);
        assert_eq!(info.reason.as_deref(), Some("Priority"));
    }

    #[test]
    fn test_parse_scontrol_output_without_state() {
        assert!(parse_scontrol_output("").is_none());
        assert!(parse_scontrol_output("JobId=12345 JobName=climo").is_none());
    }

    #[test]
    fn test_unknown_job_error() {
        assert!(is_unknown_job_error(
            "slurm_load_jobs error: Invalid job id specified"
        ));
        assert!(!is_unknown_job_error("Socket timed out on send/recv operation"));
    }

    #[test]
    fn test_parse_sacct_output() {
        let output = "JobID|JobName|State|ExitCode\n12345|my_job|COMPLETED|0:0\n12345.batch|batch|COMPLETED|0:0\n";
        let info = parse_sacct_output(output).unwrap().unwrap();
        assert_eq!(info.job_id, "12345");
        assert_eq!(info.state, SlurmState::Completed);
        assert_eq!(info.exit_code, Some(0));

        let output = "JobID|JobName|State|ExitCode\n12345|my_job|CANCELLED by 1000|0:15\n";
        let info = parse_sacct_output(output).unwrap().unwrap();
        assert_eq!(info.state, SlurmState::Cancelled);

        assert!(parse_sacct_output("JobID|JobName|State|ExitCode\n").unwrap().is_none());
    }

    #[test]
    fn test_parse_slurm_state() {
        assert_eq!(parse_slurm_state("PENDING"), SlurmState::Pending);
        assert_eq!(parse_slurm_state("PD"), SlurmState::Pending);
        assert_eq!(parse_slurm_state("R"), SlurmState::Running);
        assert_eq!(parse_slurm_state("completing"), SlurmState::Completing);
        assert_eq!(parse_slurm_state("TIMEOUT"), SlurmState::Timeout);
        assert!(matches!(parse_slurm_state("UNKNOWN_STATE"), SlurmState::Unknown(_)));
        assert!(matches!(parse_slurm_state(""), SlurmState::Unknown(_)));
    }
}
