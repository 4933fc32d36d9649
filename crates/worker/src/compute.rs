//! The compute child process.
//!
//! The subprocess substrate runs `taskforge-worker compute`, writes one
//! [`JobDescriptor`] as JSON to its stdin and reads [`ComputeMessage`]s back,
//! one JSON object per stdout line. The child exits after the terminal
//! message; killing it is how a running task is terminated.

use std::io::{self, BufRead, Write};

use serde::{Deserialize, Serialize};
use taskforge_core::task::TaskResult;
use taskforge_core::workload::{Checkpoint, Workload, WorkloadError};
use taskforge_db::models::job::JobDescriptor;

/// Name of the subcommand that runs [`run_compute`].
pub const COMPUTE_SUBCOMMAND: &str = "compute";

/// One line of compute output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComputeMessage {
    Progress { percent: u8 },
    Completed { result: TaskResult },
    Failed { error: String },
}

fn write_message<W: Write>(output: &mut W, message: &ComputeMessage) -> io::Result<()> {
    serde_json::to_writer(&mut *output, message)?;
    output.write_all(b"\n")?;
    output.flush()
}

/// Read a job from `input`, run it and report on `output`.
///
/// A malformed request is reported as a `failed` message, not an error:
/// the parent treats it like any other workload failure. Only an I/O error
/// on `output` is returned, since nothing can be reported in that case.
pub fn run_compute<R, W>(workload: &dyn Workload, input: R, mut output: W) -> io::Result<()>
where
    R: BufRead,
    W: Write,
{
    let job: JobDescriptor = match serde_json::from_reader(input) {
        Ok(job) => job,
        Err(e) => {
            return write_message(
                &mut output,
                &ComputeMessage::Failed {
                    error: format!("invalid compute request: {e}"),
                },
            );
        }
    };

    tracing::debug!(task_id = %job.task_id, workload = workload.name(), "Compute started");

    let mut write_failed: Option<io::Error> = None;
    let mut sink = |percent: u8| {
        match write_message(&mut output, &ComputeMessage::Progress { percent }) {
            Ok(()) => Checkpoint::Continue,
            // The parent is gone; stop wasting cycles.
            Err(e) => {
                write_failed = Some(e);
                Checkpoint::Stop
            }
        }
    };
    let outcome = workload.run(&job.params, &mut sink);

    if let Some(e) = write_failed {
        return Err(e);
    }

    let message = match outcome {
        Ok(result) => ComputeMessage::Completed { result },
        Err(WorkloadError::Failed(error)) => ComputeMessage::Failed { error },
        Err(WorkloadError::Interrupted) => ComputeMessage::Failed {
            error: "interrupted".to_string(),
        },
    };
    write_message(&mut output, &message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use taskforge_core::task::TaskParams;
    use taskforge_core::types::new_task_id;
    use taskforge_core::workload::{MonteCarloPi, ProgressSink};

    fn request(iterations: u64) -> Vec<u8> {
        serde_json::to_vec(&JobDescriptor {
            task_id: new_task_id(),
            owner_id: 1,
            params: TaskParams { iterations },
        })
        .unwrap()
    }

    fn parse(output: &[u8]) -> Vec<ComputeMessage> {
        String::from_utf8_lossy(output)
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn reports_progress_then_completes() {
        let mut output = Vec::new();
        run_compute(
            &MonteCarloPi::with_min_stride(1),
            request(10_000).as_slice(),
            &mut output,
        )
        .unwrap();

        let messages = parse(&output);
        assert_eq!(messages.len(), 100);
        assert_matches!(messages[0], ComputeMessage::Progress { percent: 1 });
        assert_matches!(
            &messages[99],
            ComputeMessage::Completed { result: TaskResult::Estimate { iterations: 10_000, .. } }
        );
    }

    #[test]
    fn malformed_request_is_reported_as_failure() {
        let mut output = Vec::new();
        run_compute(&MonteCarloPi::default(), &b"{not json"[..], &mut output).unwrap();

        let messages = parse(&output);
        assert_matches!(&messages[..], [ComputeMessage::Failed { error }] if error.contains("invalid"));
    }

    struct Exploding;

    impl Workload for Exploding {
        fn name(&self) -> &'static str {
            "exploding"
        }

        fn run(
            &self,
            _params: &TaskParams,
            progress: &mut dyn ProgressSink,
        ) -> Result<TaskResult, WorkloadError> {
            progress.report(50);
            Err(WorkloadError::Failed("division by zero".into()))
        }
    }

    #[test]
    fn workload_failure_is_reported() {
        let mut output = Vec::new();
        run_compute(&Exploding, request(10).as_slice(), &mut output).unwrap();

        assert_eq!(
            parse(&output),
            vec![
                ComputeMessage::Progress { percent: 50 },
                ComputeMessage::Failed {
                    error: "division by zero".into()
                },
            ]
        );
    }
}
