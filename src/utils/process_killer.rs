use std::time::Duration;
use tokio::process::Child;

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// 发信号前子进程已经退出
    AlreadyExited,
    /// 收到 SIGTERM 后在超时前退出
    Graceful,
    /// 超时后被 SIGKILL 强制结束
    Forced,
}

/// 优雅停止子进程：先给整个进程组发 SIGTERM，等待 `timeout`，仍未退出则 SIGKILL
///
/// 子进程需要以独立进程组启动（`process_group(0)`），这样 python 派生出的子进程也会一起收到信号。
pub async fn terminate_gracefully(child: &mut Child, timeout: Duration) -> std::io::Result<Termination> {
    let Some(pid) = child.id() else {
        return Ok(Termination::AlreadyExited);
    };

    #[cfg(unix)]
    {
        signal_group(pid, Signal::SIGTERM);

        return match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => {
                status?;
                Ok(Termination::Graceful)
            }
            Err(_) => {
                tracing::warn!(
                    pid,
                    timeout_ms = timeout.as_millis() as u64,
                    "process ignored SIGTERM, sending SIGKILL"
                );
                signal_group(pid, Signal::SIGKILL);
                child.wait().await?;
                Ok(Termination::Forced)
            }
        };
    }

    #[cfg(not(unix))]
    {
        // Windows 没有 SIGTERM，直接结束
        let _ = (pid, timeout);
        child.start_kill()?;
        child.wait().await?;
        return Ok(Termination::Forced);
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: Signal) {
    match killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) => {}
        Err(Errno::ESRCH) => {
            // 进程组已经不存在
        }
        Err(err) => {
            tracing::warn!(pid, ?signal, error = %err, "failed to signal process group");
        }
    }
}
