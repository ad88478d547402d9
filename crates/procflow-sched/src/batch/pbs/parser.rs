//! Parsers for PBS command output.

use crate::batch::pbs::adapter::{PbsJobInfo, PbsState};
use crate::error::{SchedError, SchedResult};

/// Parse qsub output to extract job ID.
///
/// qsub output format varies by PBS implementation:
/// - PBS Pro: "12345.pbs-server"
/// - Torque: "12345.server.domain.com"
/// - OpenPBS: "12345.hostname"
pub fn parse_qsub_output(output: &str) -> SchedResult<String> {
    let trimmed = output.trim();

    if numeric_job_id(trimmed).is_some() {
        return Ok(trimmed.to_string());
    }

    Err(SchedError::PbsCommandError {
        command: "qsub".to_string(),
        message: format!("Unexpected output format: {}", trimmed),
    })
}

/// The numeric part of a PBS job ID (`12345.pbs-server` -> 12345).
pub fn numeric_job_id(job_id: &str) -> Option<u64> {
    let head = job_id.trim().split('.').next()?;
    if head.is_empty() || !head.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    head.parse().ok()
}

/// Whether qstat stderr says the server does not know the job.
pub fn is_unknown_job_error(stderr: &str) -> bool {
    stderr.contains("Unknown Job Id") || stderr.contains("does not exist")
}

/// Parse qstat full output (`-f` or `-xf`) to extract job information.
///
/// qstat -f output format:
/// ```text
/// Job Id: 12345.pbs-server
///     Job_Name = my_job
///     job_state = R
///     queue = batch
///     Exit_status = 0
///     resources_used.walltime = 00:05:23
/// ```
pub fn parse_qstat_full_output(output: &str) -> SchedResult<Option<PbsJobInfo>> {
    if output.trim().is_empty() {
        return Ok(None);
    }

    let mut job_id = String::new();
    let mut name = String::new();
    let mut state = PbsState::Unknown(String::new());
    let mut queue = None;
    let mut exit_status = None;
    let mut walltime_used = None;

    for line in output.lines() {
        let line = line.trim();

        if let Some(id) = line.strip_prefix("Job Id:") {
            job_id = id.trim().to_string();
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim();
            match key.trim() {
                "Job_Name" => name = value.to_string(),
                "job_state" => state = parse_pbs_state(value),
                "queue" => queue = Some(value.to_string()),
                "Exit_status" => exit_status = value.parse().ok(),
                "resources_used.walltime" => walltime_used = Some(value.to_string()),
                _ => {}
            }
        }
    }

    if job_id.is_empty() {
        return Ok(None);
    }

    Ok(Some(PbsJobInfo {
        job_id,
        name,
        state,
        queue,
        exit_status,
        walltime_used,
    }))
}

/// Parse PBS state string to PbsState enum.
///
/// PBS Pro reports `F` for every finished job; callers check the exit
/// status to tell success from failure.
pub fn parse_pbs_state(state: &str) -> PbsState {
    match state.to_uppercase().as_str() {
        "Q" | "QUEUED" => PbsState::Queued,
        "R" | "RUNNING" => PbsState::Running,
        "E" | "EXITING" => PbsState::Exiting,
        "C" | "COMPLETED" | "F" | "FINISHED" => PbsState::Completed,
        "H" | "HELD" => PbsState::Held,
        "W" | "WAITING" => PbsState::Waiting,
        "S" | "SUSPENDED" => PbsState::Suspended,
        "T" | "TRANSIT" => PbsState::Transit,
        "B" | "BEGUN" => PbsState::ArrayRunning,
        "X" | "EXPIRED" | "FAILED" => PbsState::Failed,
        _ => PbsState::Unknown(state.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_qsub_output() {
        assert_eq!(parse_qsub_output("12345.pbs-server\n").unwrap(), "12345.pbs-server");
        assert_eq!(parse_qsub_output("678").unwrap(), "678");
        assert!(parse_qsub_output("qsub: Unknown queue").is_err());
        assert!(parse_qsub_output("").is_err());
    }

    #[test]
    fn test_numeric_job_id() {
        assert_eq!(numeric_job_id("12345.server.domain.com"), Some(12345));
        assert_eq!(numeric_job_id("42"), Some(42));
        assert_eq!(numeric_job_id("abc.server"), None);
        assert_eq!(numeric_job_id("12[].server"), None);
    }

    #[test]
    fn test_parse_qstat_full_output() {
        let output = "Job Id: 12345.pbs-server\n    Job_Name = amwg_1_5\n    job_state = R\n    \
                      queue = batch\n    resources_used.walltime = 00:05:23\n";
        let info = parse_qstat_full_output(output).unwrap().unwrap();
        assert_eq!(info.job_id, "12345.pbs-server");
        assert_eq!(info.name, "amwg_1_5");
        assert_eq!(info.state, PbsState::Running);
        assert_eq!(info.queue.as_deref(), Some("batch"));
        assert_eq!(info.walltime_used.as_deref(), Some("00:05:23"));
        assert!(info.exit_status.is_none());
    }

    #[test]
    fn test_parse_qstat_finished_with_exit_status() {
        let output = "Job Id: 99.pbs\n    job_state = F\n    Exit_status = 1\n";
        let info = parse_qstat_full_output(output).unwrap().unwrap();
        assert_eq!(info.state, PbsState::Completed);
        assert_eq!(info.exit_status, Some(1));
    }

    #[test]
    fn test_parse_qstat_empty() {
        assert!(parse_qstat_full_output("").unwrap().is_none());
        assert!(parse_qstat_full_output("    job_state = R\n").unwrap().is_none());
    }

    #[test]
    fn test_parse_pbs_state() {
        assert_eq!(parse_pbs_state("Q"), PbsState::Queued);
        assert_eq!(parse_pbs_state("r"), PbsState::Running);
        assert_eq!(parse_pbs_state("F"), PbsState::Completed);
        assert_eq!(parse_pbs_state("X"), PbsState::Failed);
        assert!(matches!(parse_pbs_state("Z"), PbsState::Unknown(_)));
    }

    #[test]
    fn test_unknown_job_error() {
        assert!(is_unknown_job_error("qstat: Unknown Job Id 12345.pbs"));
        assert!(!is_unknown_job_error(""));
    }
}
