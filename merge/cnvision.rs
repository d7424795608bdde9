use super::{CallingSoftware, CnvMerger, FormattedInput, MergeError};
use std::ffi::OsStr;
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const RUN_TAG: &str = "tmp";
const MERGED_FILE: &str = "Sum_CNVisionMerged_PC_QS_tmp.txt";
const POLL_INTERVAL: Duration = Duration::from_millis(50);
const READER_GRACE: Duration = Duration::from_secs(1);

/// Drives the CNVision format-and-merge Perl script.
#[derive(Debug, Clone)]
pub struct CnVision {
    interpreter: PathBuf,
    script: PathBuf,
    timeout: Duration,
}

impl CnVision {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3600);

    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: PathBuf::from("perl"),
            script: script.into(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<PathBuf>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn format_flag(software: CallingSoftware) -> &'static str {
        match software {
            CallingSoftware::PennCnv => "--PNformat",
            CallingSoftware::QuantiSnp => "--QTformat",
        }
    }

    fn formatted_file(software: CallingSoftware) -> String {
        let prefix = match software {
            CallingSoftware::PennCnv => "PC",
            CallingSoftware::QuantiSnp => "QS",
        };
        format!("{prefix}_{RUN_TAG}_CNVisionFormated.txt")
    }

    /// Runs one script invocation, streaming its stdout to the log. The child
    /// is killed once the timeout elapses.
    fn run_step(&self, step: &'static str, args: &[&OsStr]) -> Result<(), MergeError> {
        log::info!("CNVision {step} step");
        let mut child = Command::new(&self.interpreter)
            .arg(&self.script)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| MergeError::Spawn {
                program: self.interpreter.clone(),
                source,
            })?;

        let stdout_reader = child.stdout.take().map(|out| {
            thread::spawn(move || {
                for line in BufReader::new(out).lines().map_while(Result::ok) {
                    log::info!("{}", line.trim_end());
                }
            })
        });
        let stderr_reader = child.stderr.take().map(|mut err| {
            thread::spawn(move || {
                let mut buffer = String::new();
                let _ = err.read_to_string(&mut buffer);
                buffer
            })
        });

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(MergeError::Timeout {
                    step,
                    timeout: self.timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        // Processes left behind by the tool can hold the pipes open.
        let deadline = Instant::now() + READER_GRACE;
        if let Some(handle) = stdout_reader {
            if join_until(handle, deadline).is_none() {
                log::warn!("CNVision {step} step exited but its output is still open; not waiting");
            }
        }
        let stderr = stderr_reader
            .and_then(|handle| join_until(handle, deadline))
            .unwrap_or_default();

        if !status.success() {
            return Err(MergeError::ExternalTool {
                step,
                exit_code: status.code(),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Joins `handle` if it finishes before `deadline`, otherwise detaches it.
fn join_until<T>(handle: thread::JoinHandle<T>, deadline: Instant) -> Option<T> {
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(POLL_INTERVAL);
    }
    handle.join().ok()
}

impl CnvMerger for CnVision {
    fn merge(&self, inputs: &[FormattedInput], output_dir: &Path) -> Result<PathBuf, MergeError> {
        let penncnv = inputs
            .iter()
            .filter(|i| i.software == CallingSoftware::PennCnv)
            .collect::<Vec<_>>();
        let quantisnp = inputs
            .iter()
            .filter(|i| i.software == CallingSoftware::QuantiSnp)
            .collect::<Vec<_>>();
        if penncnv.len() != 1 || quantisnp.len() != 1 {
            return Err(MergeError::UnsupportedCombination);
        }

        // Removed on drop, whichever way this function returns.
        let work = tempfile::tempdir()?;
        let work_dir = work.path().as_os_str();
        let mut formatted = Vec::with_capacity(2);
        for input in [penncnv[0], quantisnp[0]] {
            self.run_step(
                "format",
                &[
                    OsStr::new(Self::format_flag(input.software)),
                    input.path.as_os_str(),
                    work_dir,
                    OsStr::new(RUN_TAG),
                ],
            )?;
            let out = work.path().join(Self::formatted_file(input.software));
            if !out.exists() {
                return Err(MergeError::MissingOutput(out));
            }
            formatted.push(out);
        }

        self.run_step(
            "merge",
            &[
                OsStr::new("--merge"),
                formatted[0].as_os_str(),
                formatted[1].as_os_str(),
                work_dir,
                OsStr::new(RUN_TAG),
            ],
        )?;
        let merged = work.path().join(MERGED_FILE);
        if !merged.exists() {
            return Err(MergeError::MissingOutput(merged));
        }

        fs::create_dir_all(output_dir)?;
        let destination = output_dir.join(MERGED_FILE);
        fs::copy(&merged, &destination)?;
        Ok(destination)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::merge::pair_inputs;
    use tempfile::tempdir;

    /// A stand-in for the Perl script that writes the files CNVision would.
    const FAKE_SCRIPT: &str = r#"
case "$1" in
  --PNformat) cp "$2" "$3/PC_$4_CNVisionFormated.txt" ;;
  --QTformat) cp "$2" "$3/QS_$4_CNVisionFormated.txt" ;;
  --merge)
    head -n 1 "$2" > "$4/Sum_CNVisionMerged_PC_QS_$5.txt"
    tail -n +2 "$2" >> "$4/Sum_CNVisionMerged_PC_QS_$5.txt"
    tail -n +2 "$3" >> "$4/Sum_CNVisionMerged_PC_QS_$5.txt"
    ;;
esac
echo "done $1"
"#;

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("cnvision.sh");
        fs::write(&path, body).unwrap();
        path
    }

    fn inputs(dir: &Path) -> Vec<FormattedInput> {
        let pc = dir.join("pc.txt");
        let qs = dir.join("qs.txt");
        fs::write(&pc, "SampleID\tCHR\tSTART\tSTOP\nS1\t1\t10\t20\n").unwrap();
        fs::write(&qs, "SampleID\tCHR\tSTART\tSTOP\nS2\t2\t30\t40\n").unwrap();
        pair_inputs(&[pc, qs], &["PennCNV", "QuantiSNP"]).unwrap()
    }

    #[test]
    fn format_and_merge_steps_produce_the_merged_table() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), FAKE_SCRIPT);
        let merger = CnVision::new(script).with_interpreter("sh");
        let out_dir = dir.path().join("out");
        let merged = merger.merge(&inputs(dir.path()), &out_dir).unwrap();
        assert_eq!(merged, out_dir.join(MERGED_FILE));
        let content = fs::read_to_string(merged).unwrap();
        assert_eq!(content.lines().count(), 3);
    }

    #[test]
    fn failing_tool_reports_exit_code_and_stderr() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "echo 'bad input' >&2\nexit 3\n");
        let merger = CnVision::new(script).with_interpreter("sh");
        match merger.merge(&inputs(dir.path()), dir.path()) {
            Err(MergeError::ExternalTool {
                exit_code, stderr, ..
            }) => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr, "bad input");
            }
            other => panic!("Expected ExternalTool, got {:?}", other),
        }
    }

    #[test]
    fn slow_tool_is_killed_after_the_timeout() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "sleep 10\n");
        let merger = CnVision::new(script)
            .with_interpreter("sh")
            .with_timeout(Duration::from_millis(200));
        let started = Instant::now();
        assert!(matches!(
            merger.merge(&inputs(dir.path()), dir.path()),
            Err(MergeError::Timeout { step: "format", .. })
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn background_process_holding_output_does_not_block_the_step() {
        let dir = tempdir().unwrap();
        let script = write_script(dir.path(), "sleep 10 &\necho started\n");
        let merger = CnVision::new(script)
            .with_interpreter("sh")
            .with_timeout(Duration::from_secs(30));
        let started = Instant::now();
        merger.run_step("format", &[]).unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn missing_interpreter_is_a_spawn_error() {
        let dir = tempdir().unwrap();
        let merger = CnVision::new(dir.path().join("x.pl"))
            .with_interpreter(dir.path().join("no-such-perl"));
        assert!(matches!(
            merger.merge(&inputs(dir.path()), dir.path()),
            Err(MergeError::Spawn { .. })
        ));
    }

    #[test]
    fn two_penncnv_inputs_are_rejected() {
        let dir = tempdir().unwrap();
        let mut pair = inputs(dir.path());
        pair[1].software = CallingSoftware::PennCnv;
        assert!(matches!(
            CnVision::new("x.pl").merge(&pair, dir.path()),
            Err(MergeError::UnsupportedCombination)
        ));
    }
}
