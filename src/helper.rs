//! External helper programs for formats that cannot be counted
//! analytically. Helpers run as blocking subprocesses with the staged file
//! path as an argument.

use crate::{
    config::{HelperCommand, HelperOutputMode},
    error::{PdlError, Result},
    parsers::Format,
    util::expand_tilde,
};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Placeholder in helper arguments replaced by the job's path.
pub const INPUT_PLACEHOLDER: &str = "{input}";

#[derive(Debug)]
pub struct HelperOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Resolves a program on `PATH`. `a|b` lists alternatives; the first one
/// found wins.
pub fn find_executable(program: &str) -> Option<PathBuf> {
    for candidate in program.split('|').map(str::trim).filter(|c| !c.is_empty()) {
        if candidate.contains(std::path::MAIN_SEPARATOR) {
            let p = expand_tilde(candidate);
            if is_executable(&p) {
                return Some(p);
            }
            continue;
        }
        let Some(path_var) = std::env::var_os("PATH") else {
            continue;
        };
        for dir in std::env::split_paths(&path_var) {
            let dir = expand_tilde(&dir.to_string_lossy());
            let full = dir.join(candidate);
            if is_executable(&full) {
                return Some(full);
            }
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(p: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(p)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(p: &Path) -> bool {
    p.is_file() || p.with_extension("exe").is_file()
}

/// Runs `cmd` against `input`. A missing program or an exceeded timeout is
/// reported as [`PdlError::MissingDependency`]; `timeout_seconds == 0`
/// waits indefinitely.
pub fn run_helper(cmd: &HelperCommand, input: &Path, timeout_seconds: u64) -> Result<HelperOutput> {
    let exe = find_executable(&cmd.program).ok_or_else(|| PdlError::MissingDependency {
        helper: cmd.program.clone(),
        reason: "not found on PATH".into(),
    })?;

    let input_str = input.display().to_string();
    let args: Vec<String> = cmd
        .args
        .iter()
        .map(|a| a.replace(INPUT_PLACEHOLDER, &input_str))
        .collect();
    debug!(
        "helper run {} {:?} timeout={}s",
        exe.display(),
        args,
        timeout_seconds
    );

    let mut child = Command::new(&exe)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| PdlError::MissingDependency {
            helper: cmd.program.clone(),
            reason: format!("spawning {}: {e}", exe.display()),
        })?;

    let timeout = (timeout_seconds > 0).then(|| Duration::from_secs(timeout_seconds));
    let output = wait_with_timeout(&mut child, timeout, &cmd.program)?;

    if !output.status.success() {
        return Err(PdlError::MissingDependency {
            helper: cmd.program.clone(),
            reason: format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(output)
}

/// Turns helper output into a page count according to `mode`.
pub fn page_count(mode: HelperOutputMode, output: &HelperOutput, format: Format) -> Result<u64> {
    match mode {
        HelperOutputMode::Count => {
            let text = String::from_utf8_lossy(&output.stdout);
            let trimmed = text.trim();
            trimmed.parse::<u64>().map_err(|_| {
                let detail = format!("helper printed {trimmed:?}, not a page count");
                PdlError::malformed(format, 0, detail)
            })
        }
        HelperOutputMode::BboxLines => {
            let count = |buf: &[u8]| {
                buf.split(|&b| b == b'\n')
                    .filter(|line| crate::parsers::contains(line, b"%%HiResBoundingBox"))
                    .count() as u64
            };
            Ok(count(&output.stdout) + count(&output.stderr))
        }
    }
}

fn wait_with_timeout(
    child: &mut Child,
    timeout: Option<Duration>,
    helper: &str,
) -> Result<HelperOutput> {
    // Drain pipes while waiting so a chatty helper can't block on a full
    // stdout/stderr buffer.
    let stdout_reader = child.stdout.take();
    let stderr_reader = child.stderr.take();

    let stdout_thread = std::thread::spawn(move || -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout_reader {
            out.read_to_end(&mut buf)?;
        }
        Ok(buf)
    });

    let stderr_thread = std::thread::spawn(move || -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr_reader {
            err.read_to_end(&mut buf)?;
        }
        Ok(buf)
    });

    let join = |h: JoinHandle<std::io::Result<Vec<u8>>>, what: &str| -> Result<Vec<u8>> {
        h.join()
            .map_err(|_| {
                let panicked = std::io::Error::other("panic");
                PdlError::io(format!("{what} reader thread panicked"), panicked)
            })?
            .map_err(|e| PdlError::io(format!("read helper {what}"), e))
    };

    let start = Instant::now();
    loop {
        let status = child
            .try_wait()
            .map_err(|e| PdlError::io(format!("wait for {helper}"), e))?;
        if let Some(status) = status {
            let stdout = join(stdout_thread, "stdout")?;
            let stderr = join(stderr_thread, "stderr")?;
            return Ok(HelperOutput {
                status,
                stdout,
                stderr,
            });
        }

        if let Some(limit) = timeout {
            if start.elapsed() > limit {
                warn!("helper {helper} timed out after {:?}", limit);
                let _ = child.kill();
                let _ = child.wait();
                let _ = join(stdout_thread, "stdout");
                let _ = join(stderr_thread, "stderr");
                return Err(PdlError::MissingDependency {
                    helper: helper.to_string(),
                    reason: format!("timed out after {limit:?}"),
                });
            }
        }

        std::thread::sleep(Duration::from_millis(20));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str, output: HelperOutputMode) -> HelperCommand {
        HelperCommand {
            program: "sh".into(),
            args: vec!["-c".into(), script.into(), "sh".into(), INPUT_PLACEHOLDER.into()],
            output,
        }
    }

    #[test]
    fn missing_program_is_missing_dependency() {
        let cmd = HelperCommand {
            program: "pdlcount-no-such-helper".into(),
            args: vec![],
            output: HelperOutputMode::Count,
        };
        let err = run_helper(&cmd, Path::new("/dev/null"), 5).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MissingDependency);
    }

    #[test]
    fn alternatives_fall_through() {
        assert!(find_executable("pdlcount-no-such-helper|sh").is_some());
    }

    #[test]
    fn input_placeholder_is_substituted() {
        let cmd = sh("echo \"$1\"", HelperOutputMode::Count);
        let out = run_helper(&cmd, Path::new("/tmp/job.prn"), 5).unwrap();
        assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "/tmp/job.prn");
    }

    #[test]
    fn count_mode_parses_trimmed_stdout() {
        let cmd = sh("echo '  7 '", HelperOutputMode::Count);
        let out = run_helper(&cmd, Path::new("/dev/null"), 5).unwrap();
        assert_eq!(page_count(cmd.output, &out, Format::PostScript).unwrap(), 7);
    }

    #[test]
    fn bbox_mode_counts_both_streams() {
        let cmd = sh(
            "echo '%%HiResBoundingBox: 0 0 1 1'; echo '%%HiResBoundingBox: 0 0 1 1' 1>&2",
            HelperOutputMode::BboxLines,
        );
        let out = run_helper(&cmd, Path::new("/dev/null"), 5).unwrap();
        assert_eq!(page_count(cmd.output, &out, Format::PostScript).unwrap(), 2);
    }

    #[test]
    fn timeout_maps_to_missing_dependency() {
        let cmd = sh("sleep 3", HelperOutputMode::Count);
        let err = run_helper(&cmd, Path::new("/dev/null"), 1).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MissingDependency);
    }
}
