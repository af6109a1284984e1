use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::oracle::error::OracleError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 子进程运行结果
#[derive(Debug)]
pub struct ProcessOutcome {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutcome {
    /// 非零退出转换成 `OracleError::ProcessFailed`
    pub fn check(self) -> Result<Self, OracleError> {
        if self.status.success() {
            Ok(self)
        } else {
            Err(OracleError::ProcessFailed {
                status: self.status.to_string(),
                stderr: tail(&self.stderr, 2000),
            })
        }
    }
}

/// 阻塞运行外部命令并捕获 stdout/stderr
///
/// `timeout` 为 None 时一直等待进程结束。超时后整个进程组会被 kill，
/// 返回 `OracleError::Timeout`。
///
/// Unix 上子进程是新进程组的组长，包装脚本派生出的预测进程也在这个组里。
pub fn run_command(
    mut command: Command,
    timeout: Option<Duration>,
) -> Result<ProcessOutcome, OracleError> {
    let program = command.get_program().to_string_lossy().into_owned();
    debug!("running predictor: {:?}", command);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| OracleError::Spawn {
            program: program.clone(),
            source,
        })?;

    // 管道在独立线程里读完，避免输出过多时子进程阻塞在写管道上
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(source) => {
                return Err(OracleError::Spawn { program, source });
            }
        }

        if let Some(limit) = timeout {
            if started.elapsed() >= limit {
                kill_process_group(&mut child);
                let _ = child.wait();
                // 子进程派生的进程可能仍持有管道，这里不等待读线程
                return Err(OracleError::Timeout(limit));
            }
        }
        thread::sleep(POLL_INTERVAL);
    };

    Ok(ProcessOutcome {
        status,
        stdout: join(stdout),
        stderr: join(stderr),
    })
}

#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    let pgid = child.id() as libc::pid_t;
    // SAFETY: killpg 只发送信号，pgid 来自我们自己创建的进程组
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        warn!(
            "killpg({}) failed: {}, killing the direct child only",
            pgid,
            std::io::Error::last_os_error()
        );
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join(handle: Option<thread::JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        text.trim().to_string()
    } else {
        text.chars().skip(count - max_chars).collect::<String>().trim().to_string()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_captures_output() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo hello; echo oops >&2"]);
        let outcome = run_command(cmd, None).unwrap().check().unwrap();
        assert_eq!(outcome.stdout.trim(), "hello");
        assert_eq!(outcome.stderr.trim(), "oops");
    }

    #[test]
    fn test_nonzero_exit_is_process_failure() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo broken >&2; exit 3"]);
        let err = run_command(cmd, None).unwrap().check().unwrap_err();
        assert!(err.is_process_error());
        match err {
            OracleError::ProcessFailed { stderr, .. } => assert_eq!(stderr, "broken"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_timeout_kills_process() {
        let mut cmd = Command::new("sleep");
        cmd.arg("10");
        let started = Instant::now();
        let err = run_command(cmd, Some(Duration::from_millis(300))).unwrap_err();
        assert!(matches!(err, OracleError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    /// 进程是否还活着 (僵尸进程视为已退出)
    #[cfg(target_os = "linux")]
    fn is_running(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.split_whitespace().next())
                .map_or(false, |state| state != "Z"),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_timeout_kills_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("worker.pid");

        // 包装脚本在后台启动真正的工作进程并等待它
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(format!("sleep 21.37 & echo $! > {}; wait", pid_file.display()));
        let err = run_command(cmd, Some(Duration::from_millis(500))).unwrap_err();
        assert!(matches!(err, OracleError::Timeout(_)));

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let pid = pid.trim();
        assert!(!pid.is_empty());

        let deadline = Instant::now() + Duration::from_secs(2);
        while is_running(pid) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        assert!(!is_running(pid), "worker {} survived the timeout", pid);
    }

    #[test]
    fn test_missing_program() {
        let cmd = Command::new("/nonexistent/predictor-binary");
        let err = run_command(cmd, None).unwrap_err();
        assert!(matches!(err, OracleError::Spawn { .. }));
    }
}
