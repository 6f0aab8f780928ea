//! CUPS command-line backend (`lp`, `lpq`, `lpstat`, `cancel`).

use super::backend::{ActiveJob, BackendJobState, PrintBackend, PrintBackendError, PrintRequest};
use super::JobHandle;
use std::io;
use std::process::{Command, Output};

/// Markers preceding the job id in `lp` output, per locale.
const REQUEST_ID_MARKERS: [&str; 2] = ["request id is", "Anfrage-ID ist"];

/// Prints through the local CUPS client tools.
#[derive(Debug, Clone, Default)]
pub struct LpBackend {
    printer: String,
}

impl LpBackend {
    /// `printer` may be empty to use the system default destination.
    pub fn new(printer: impl Into<String>) -> Self {
        Self {
            printer: printer.into(),
        }
    }

    fn run(&self, program: &str, args: &[String]) -> Result<Output, PrintBackendError> {
        tracing::trace!(program, ?args, "Running print command");
        Command::new(program).args(args).output().map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                PrintBackendError::PrinterUnavailable(format!("{program} not installed"))
            } else {
                PrintBackendError::Unknown(format!("{program}: {e}"))
            }
        })
    }

    fn printer_args(&self, flag: &str) -> Vec<String> {
        if self.printer.is_empty() {
            Vec::new()
        } else {
            vec![flag.to_string(), self.printer.clone()]
        }
    }

    fn listed(&self, args: &[String], handle: &JobHandle) -> Result<bool, PrintBackendError> {
        let output = self.run("lpstat", args)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .any(|id| id == handle.as_str()))
    }
}

impl PrintBackend for LpBackend {
    fn name(&self) -> &'static str {
        "lp"
    }

    fn submit(&self, request: &PrintRequest) -> Result<JobHandle, PrintBackendError> {
        if request.copies == 0 {
            return Err(PrintBackendError::InvalidCopies(request.copies));
        }

        let mut args = vec!["-n".to_string(), request.copies.to_string()];
        args.extend(["-t".to_string(), request.title.clone()]);
        if !request.printer.is_empty() {
            args.extend(["-d".to_string(), request.printer.clone()]);
        }
        if let Some(media) = request.media {
            args.extend(["-o".to_string(), format!("media={media}")]);
        }
        args.extend(["-o".to_string(), "fit-to-page".to_string()]);
        args.push(request.file.to_string_lossy().into_owned());

        let output = self.run("lp", &args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(stderr.trim()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_request_id(&stdout).ok_or_else(|| {
            PrintBackendError::Unknown(format!("unrecognized lp output: {}", stdout.trim()))
        })
    }

    fn job_state(&self, handle: &JobHandle) -> Result<BackendJobState, PrintBackendError> {
        let mut pending = vec!["-o".to_string()];
        if !self.printer.is_empty() {
            pending.push(self.printer.clone());
        }
        if self.listed(&pending, handle)? {
            return Ok(BackendJobState::Queued);
        }

        let completed = vec!["-W".to_string(), "completed".to_string(), "-o".to_string()];
        if self.listed(&completed, handle)? {
            return Ok(BackendJobState::Completed);
        }
        Ok(BackendJobState::Unknown)
    }

    fn active_jobs(&self) -> Result<Vec<ActiveJob>, PrintBackendError> {
        let output = self.run("lpq", &self.printer_args("-P"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(stderr.trim()));
        }
        Ok(parse_lpq(&String::from_utf8_lossy(&output.stdout)))
    }

    fn cancel(&self, handle: &JobHandle) -> Result<(), PrintBackendError> {
        let output = self.run("cancel", &[handle.as_str().to_string()])?;
        if output.status.success() {
            Ok(())
        } else {
            Err(classify_failure(String::from_utf8_lossy(&output.stderr).trim()))
        }
    }
}

/// Extracts the job id from `lp` output such as
/// `request id is Canon_Printer-42 (1 file(s))`.
pub(crate) fn parse_request_id(output: &str) -> Option<JobHandle> {
    REQUEST_ID_MARKERS.iter().find_map(|marker| {
        let (_, rest) = output.split_once(marker)?;
        rest.split_whitespace().next().map(JobHandle::new)
    })
}

/// Parses `lpq` output into queued jobs.
///
/// The first line names the printer (`Canon_Printer is ready and printing`),
/// followed by a `Rank Owner Job File(s) Total Size` table.
pub(crate) fn parse_lpq(output: &str) -> Vec<ActiveJob> {
    let mut lines = output.lines();
    let Some(printer) = lines
        .next()
        .and_then(|line| line.split_whitespace().next())
    else {
        return Vec::new();
    };

    lines
        .skip_while(|line| !line.trim_start().starts_with("Rank"))
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            // rank, owner, job, file..., size, "bytes"
            if fields.len() < 5 {
                return None;
            }
            let job: u64 = fields[2].parse().ok()?;
            let title = fields[3..fields.len() - 2].join(" ");
            Some(ActiveJob {
                handle: JobHandle::new(format!("{printer}-{job}")),
                title: (!title.is_empty()).then_some(title),
            })
        })
        .collect()
}

fn classify_failure(stderr: &str) -> PrintBackendError {
    let lower = stderr.to_lowercase();
    let unavailable = ["does not exist", "not accepting", "no default destination", "unable to connect"];
    if unavailable.iter().any(|needle| lower.contains(needle)) {
        PrintBackendError::PrinterUnavailable(stderr.to_string())
    } else {
        PrintBackendError::Unknown(stderr.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_id_english_and_german() {
        assert_eq!(
            parse_request_id("request id is Canon_Printer-42 (1 file(s))\n"),
            Some(JobHandle::new("Canon_Printer-42"))
        );
        assert_eq!(
            parse_request_id("Anfrage-ID ist Canon_Printer-7 (1 Datei(en))"),
            Some(JobHandle::new("Canon_Printer-7"))
        );
        assert_eq!(parse_request_id("lp: Error - no default destination"), None);
    }

    #[test]
    fn test_parse_lpq_queue() {
        let output = "\
Canon_Printer is ready and printing
Rank    Owner   Job     File(s)                         Total Size
active  booth   42      photobooth-3_20261016_101500_123 204800 bytes
1st     booth   43      photobooth-4_20261016_101700_001 198000 bytes
";
        let jobs = parse_lpq(output);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].handle, JobHandle::new("Canon_Printer-42"));
        assert_eq!(
            jobs[1].title.as_deref(),
            Some("photobooth-4_20261016_101700_001")
        );
    }

    #[test]
    fn test_parse_lpq_empty_queue() {
        assert!(parse_lpq("Canon_Printer is ready\nno entries\n").is_empty());
        assert!(parse_lpq("").is_empty());
    }

    #[test]
    fn test_failure_classification() {
        assert!(matches!(
            classify_failure("lp: The printer or class does not exist."),
            PrintBackendError::PrinterUnavailable(_)
        ));
        assert!(matches!(
            classify_failure("lp: something odd"),
            PrintBackendError::Unknown(_)
        ));
    }
}
