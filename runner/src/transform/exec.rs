use super::{TransformError, Transformer};
use crate::{
    archive::units::Unit,
    config::{SpectrumBounds, TransformConfig},
};
use nix::{
    sys::signal::{killpg, Signal},
    unistd::Pid,
};
use std::{
    io::Read,
    os::unix::process::CommandExt,
    path::PathBuf,
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, trace, warn};
use tracing_unwrap::OptionExt;
use wait_timeout::ChildExt;

/// Runs the smoothing routine as a child process per unit.
///
/// Invocation: `exec [params..] <base> <unit> [--min-energy E] [--max-energy E]
/// [--min-wavelength W] [--max-wavelength W]`, where `base` is the directory
/// holding the unit and `unit` its directory name.
#[derive(Debug, Clone)]
pub struct ExecTransformer {
    exec: PathBuf,
    params: Vec<String>,
    bounds: SpectrumBounds,
    timeout: Duration,
}

impl ExecTransformer {
    pub fn new(
        exec: PathBuf,
        params: Vec<String>,
        bounds: SpectrumBounds,
        timeout: Duration,
    ) -> Self {
        Self {
            exec,
            params,
            bounds,
            timeout,
        }
    }

    pub fn load(config: &TransformConfig) -> Self {
        Self::new(
            config.exec.clone(),
            config.params.clone(),
            config.bounds.clone(),
            config.timeout(),
        )
    }

    fn command(&self, unit: &Unit) -> Command {
        let mut command = Command::new(&self.exec);
        command
            // own process group, so a timeout reaches everything it spawned
            .process_group(0)
            .args(self.params.iter())
            .arg(unit.base())
            .arg(&*unit.id());

        for (flag, value) in [
            ("--min-energy", self.bounds.min_energy),
            ("--max-energy", self.bounds.max_energy),
            ("--min-wavelength", self.bounds.min_wavelength),
            ("--max-wavelength", self.bounds.max_wavelength),
        ] {
            if let Some(value) = value {
                command.arg(flag).arg(value.to_string());
            }
        }

        command
    }
}

/// Kill the process group led by `child`, falling back to the child alone.
/// Returns whether the whole group was signalled.
fn kill_group(child: &mut Child) -> bool {
    let group = Pid::from_raw(child.id() as i32);

    match killpg(group, Signal::SIGKILL) {
        Ok(()) => true,
        Err(errno) => {
            warn!(error = ?errno, "Failed to kill transformer process group");
            if let Err(error) = child.kill() {
                warn!(error = ?error, "Failed to kill timed out transformer");
            }
            false
        }
    }
}

impl Transformer for ExecTransformer {
    fn apply(&self, unit: &Unit) -> Result<(), TransformError> {
        let start = Instant::now();
        let mut child = self
            .command(unit)
            .current_dir(unit.base())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(TransformError::Spawn)?;

        // drain stderr concurrently, a full pipe would otherwise stall the child
        let mut stderr = child.stderr.take().expect_or_log("stderr is piped");
        let reader = thread::spawn(move || {
            let mut buffer = String::new();
            if let Err(error) = stderr.read_to_string(&mut buffer) {
                warn!(error = ?error, "Failed to read transformer stderr");
            }
            buffer
        });

        let status = match child.wait_timeout(self.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                // child hasn't exited yet, take its helpers down with it
                if kill_group(&mut child) {
                    let _ = child.wait();
                    let _ = reader.join();
                } else {
                    // the reader is left behind, survivors may keep stderr open
                    let _ = child.wait();
                }

                return Err(TransformError::Timeout(self.timeout));
            }
            Err(error) => {
                kill_group(&mut child);
                let _ = child.wait();

                return Err(TransformError::Wait(error));
            }
        };

        let stderr = reader.join().unwrap_or_default();

        debug!(
            "Finished in {} ms | status: {}",
            start.elapsed().as_millis(),
            status.success()
        );
        trace!("Stderr: {stderr}");

        if status.success() {
            Ok(())
        } else {
            Err(TransformError::Status {
                status,
                stderr: stderr.trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, os::unix::fs::PermissionsExt, path::Path};

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("smear.sh");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn unit(dir: &Path) -> Unit {
        let unit = dir.join("data/mol_1");
        fs::create_dir_all(&unit).unwrap();
        Unit::new(unit)
    }

    #[test]
    fn passes_base_unit_and_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let exec = script(dir.path(), r#"echo "$@" > "$2/$3/args""#);
        let unit = unit(dir.path());

        let transformer = ExecTransformer::new(
            exec,
            vec!["--method".to_string()],
            SpectrumBounds::default(),
            Duration::from_secs(10),
        );
        transformer.apply(&unit).unwrap();

        let args = fs::read_to_string(unit.path().join("args")).unwrap();
        assert_eq!(
            args.trim(),
            format!(
                "--method {} mol_1 --max-energy 70",
                dir.path().join("data").display()
            )
        );
    }

    #[test]
    fn failing_exit_status_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let exec = script(dir.path(), "echo 'no uv section' >&2\nexit 3");

        let result = ExecTransformer::new(
            exec,
            Vec::new(),
            SpectrumBounds::default(),
            Duration::from_secs(10),
        )
        .apply(&unit(dir.path()));

        match result {
            Err(TransformError::Status { status, stderr }) => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(stderr, "no uv section");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn slow_transformer_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let exec = script(dir.path(), "exec sleep 5");

        let result = ExecTransformer::new(
            exec,
            Vec::new(),
            SpectrumBounds::default(),
            Duration::from_millis(200),
        )
        .apply(&unit(dir.path()));

        assert!(matches!(result, Err(TransformError::Timeout(_))));
    }

    // gone or a zombie waiting to be reaped
    fn is_gone(pid: &str) -> bool {
        match fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat.contains(") Z ") || stat.contains(") X "),
            Err(_) => true,
        }
    }

    #[test]
    fn timeout_kills_spawned_helpers() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("helper.pid");
        let exec = script(
            dir.path(),
            &format!("sleep 30 &\necho $! > {}\nwait", pid_file.display()),
        );

        let start = Instant::now();
        let result = ExecTransformer::new(
            exec,
            Vec::new(),
            SpectrumBounds::default(),
            Duration::from_millis(500),
        )
        .apply(&unit(dir.path()));

        assert!(matches!(result, Err(TransformError::Timeout(_))));
        // the stderr reader was joined, so the helper cannot have held the pipe open
        assert!(start.elapsed() < Duration::from_secs(20));

        let pid = fs::read_to_string(&pid_file).unwrap();
        let pid = pid.trim();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !is_gone(pid) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        assert!(is_gone(pid));
    }

    #[test]
    fn missing_executable_fails_to_spawn() {
        let dir = tempfile::tempdir().unwrap();

        let result = ExecTransformer::new(
            dir.path().join("missing"),
            Vec::new(),
            SpectrumBounds::default(),
            Duration::from_secs(1),
        )
        .apply(&unit(dir.path()));

        assert!(matches!(result, Err(TransformError::Spawn(_))));
    }
}
