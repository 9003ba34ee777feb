use crate::models::{LogStream, ProcessDescriptor, ProcessInfo, ProcessStatus};
use crate::services::file_watcher::FileWatcher;
use crate::services::log_writer::LogWriter;
use crate::services::restart_policy::{ExitTrigger, RestartDecision, RestartPolicy};
use crate::utils::{resident_bytes, resolve_program, terminate_gracefully};
use chrono::Utc;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{watch, Mutex};
use tokio::time::{interval_at, Instant};

pub const APP_NAME_ENV: &str = "LAUNCHER_APP_NAME";
pub const INSTANCE_ENV: &str = "LAUNCHER_INSTANCE";

const MEMORY_POLL_INTERVAL: Duration = Duration::from_secs(1);
const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(250);
const WATCH_DEBOUNCE: Duration = Duration::from_millis(500);

/// 单个实例的监督任务所需的全部状态
pub struct InstanceContext {
    pub descriptor: Arc<ProcessDescriptor>,
    pub instance: u32,
    pub logs: Arc<LogWriter>,
    pub info: Arc<Mutex<ProcessInfo>>,
}

impl InstanceContext {
    async fn set_status(&self, status: ProcessStatus) {
        let mut info = self.info.lock().await;
        info.status = status;
        if status != ProcessStatus::Running {
            info.pid = None;
        }
    }

    async fn mark_running(&self, pid: Option<u32>) {
        let mut info = self.info.lock().await;
        info.process_id = uuid::Uuid::new_v4().to_string();
        info.status = ProcessStatus::Running;
        info.started_at = Utc::now();
        info.pid = pid;
    }
}

/// 监督循环：拉起子进程，等待其退出或被要求结束，再按重启策略决定下一步
///
/// `stop_rx` 变为 `true`（或发送端被丢弃）时优雅停止子进程并结束任务。
pub async fn supervise(ctx: InstanceContext, mut stop_rx: watch::Receiver<bool>) {
    let descriptor = ctx.descriptor.clone();
    let policy = RestartPolicy::from(descriptor.as_ref());
    let mut watcher = if descriptor.watch { start_watcher(&ctx) } else { None };
    let mut unstable_restarts = 0u32;

    loop {
        if *stop_rx.borrow() {
            ctx.set_status(ProcessStatus::Stopped).await;
            break;
        }

        ctx.set_status(ProcessStatus::Starting).await;
        let started = Instant::now();
        let trigger = match spawn_child(&ctx) {
            Ok(mut child) => {
                let pid = child.id();
                ctx.mark_running(pid).await;
                tracing::info!(app = %descriptor.name, instance = ctx.instance, pid = ?pid, "process started");
                run_until_exit(&ctx, &policy, &mut child, &mut stop_rx, watcher.as_mut()).await
            }
            Err(err) => {
                tracing::error!(
                    app = %descriptor.name,
                    instance = ctx.instance,
                    command = %descriptor.command_line(),
                    error = %err,
                    "failed to spawn process"
                );
                ExitTrigger::SpawnFailed
            }
        };

        let uptime = started.elapsed();
        if uptime < policy.min_uptime() {
            unstable_restarts += 1;
        } else {
            unstable_restarts = 0;
        }

        match policy.decide(&trigger, uptime, unstable_restarts) {
            RestartDecision::Restart { delay } => {
                tracing::warn!(
                    app = %descriptor.name,
                    instance = ctx.instance,
                    trigger = ?trigger,
                    delay_ms = delay.as_millis() as u64,
                    "restarting process"
                );
                let waiting = if matches!(trigger, ExitTrigger::Crashed { .. } | ExitTrigger::SpawnFailed) {
                    ProcessStatus::Crashed
                } else {
                    ProcessStatus::Starting
                };
                ctx.set_status(waiting).await;

                if wait_or_stop(delay, &mut stop_rx).await {
                    ctx.set_status(ProcessStatus::Stopped).await;
                    break;
                }
                ctx.info.lock().await.restarts += 1;
            }
            RestartDecision::GiveUp => {
                tracing::error!(
                    app = %descriptor.name,
                    instance = ctx.instance,
                    restarts = unstable_restarts - 1,
                    "too many unstable restarts, giving up"
                );
                ctx.set_status(ProcessStatus::Errored).await;
                break;
            }
            RestartDecision::Halt | RestartDecision::Ignore => {
                let status = match trigger {
                    ExitTrigger::Crashed { .. } | ExitTrigger::SpawnFailed => ProcessStatus::Errored,
                    _ => ProcessStatus::Stopped,
                };
                tracing::info!(app = %descriptor.name, instance = ctx.instance, trigger = ?trigger, "process halted");
                ctx.set_status(status).await;
                break;
            }
        }
    }
}

fn start_watcher(ctx: &InstanceContext) -> Option<FileWatcher> {
    let descriptor = &ctx.descriptor;
    match FileWatcher::new(
        &descriptor.cwd,
        &descriptor.ignore_watch,
        descriptor.logging.file_paths(),
        WATCH_DEBOUNCE,
    ) {
        Ok(watcher) => Some(watcher),
        Err(err) => {
            tracing::warn!(
                app = %descriptor.name,
                instance = ctx.instance,
                cwd = %descriptor.cwd.display(),
                error = %err,
                "failed to watch working directory, file changes will not restart the process"
            );
            None
        }
    }
}

fn spawn_child(ctx: &InstanceContext) -> std::io::Result<Child> {
    let descriptor = &ctx.descriptor;

    if !descriptor.cwd.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("工作目录不存在: {}", descriptor.cwd.display()),
        ));
    }

    let path_var = descriptor.env.get("PATH").map(String::as_str);
    let executable = resolve_program(&descriptor.program, &descriptor.cwd, path_var).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("找不到可执行文件: {}", descriptor.program),
        )
    })?;

    let mut command = Command::new(&executable);
    command
        .args(&descriptor.args)
        .current_dir(&descriptor.cwd)
        .envs(&descriptor.env)
        .env(APP_NAME_ENV, &descriptor.name)
        .env(INSTANCE_ENV, ctx.instance.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // 独立进程组，停止时连同子进程一起发信号
    #[cfg(unix)]
    command.process_group(0);

    #[cfg(target_os = "windows")]
    {
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        command.creation_flags(CREATE_NO_WINDOW);
    }

    let mut child = command.spawn()?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(pump_lines(stdout, LogStream::Stdout, ctx.logs.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(pump_lines(stderr, LogStream::Stderr, ctx.logs.clone()));
    }

    Ok(child)
}

async fn pump_lines<R: AsyncRead + Unpin>(reader: R, stream: LogStream, logs: Arc<LogWriter>) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                logs.write_line(stream, line.trim_end_matches(['\n', '\r'])).await;
            }
        }
    }
}

async fn run_until_exit(
    ctx: &InstanceContext,
    policy: &RestartPolicy,
    child: &mut Child,
    stop_rx: &mut watch::Receiver<bool>,
    mut watcher: Option<&mut FileWatcher>,
) -> ExitTrigger {
    let descriptor = &ctx.descriptor;
    let pid = child.id();
    let mut memory_tick = interval_at(Instant::now() + MEMORY_POLL_INTERVAL, MEMORY_POLL_INTERVAL);
    let mut watch_tick = interval_at(Instant::now() + WATCH_POLL_INTERVAL, WATCH_POLL_INTERVAL);

    loop {
        tokio::select! {
            status = child.wait() => {
                return match status {
                    Ok(status) if status.success() => ExitTrigger::Exited,
                    Ok(status) => {
                        tracing::warn!(app = %descriptor.name, instance = ctx.instance, %status, "process exited");
                        ExitTrigger::Crashed { code: status.code(), signal: exit_signal(&status) }
                    }
                    Err(err) => {
                        tracing::warn!(app = %descriptor.name, instance = ctx.instance, error = %err, "failed to wait on process");
                        ExitTrigger::Crashed { code: None, signal: None }
                    }
                };
            }
            changed = stop_rx.changed() => {
                if changed.is_ok() && !*stop_rx.borrow() {
                    continue;
                }
                stop_child(ctx, child).await;
                return ExitTrigger::OperatorStop;
            }
            _ = memory_tick.tick(), if descriptor.max_memory_bytes.is_some() => {
                if let (Some(limit), Some(rss)) = (descriptor.max_memory_bytes, pid.and_then(resident_bytes)) {
                    if rss > limit {
                        tracing::warn!(app = %descriptor.name, instance = ctx.instance, rss, limit, "memory threshold exceeded");
                        stop_child(ctx, child).await;
                        return ExitTrigger::MemoryExceeded { rss, limit };
                    }
                }
            }
            _ = watch_tick.tick(), if watcher.is_some() => {
                if let Some(path) = watcher.as_deref_mut().and_then(FileWatcher::poll_changes) {
                    let trigger = ExitTrigger::FileChanged { path };
                    if matches!(policy.decide(&trigger, Duration::ZERO, 0), RestartDecision::Restart { .. }) {
                        tracing::info!(app = %descriptor.name, instance = ctx.instance, trigger = ?trigger, "file change detected");
                        stop_child(ctx, child).await;
                        return trigger;
                    }
                }
            }
        }
    }
}

async fn stop_child(ctx: &InstanceContext, child: &mut Child) {
    ctx.set_status(ProcessStatus::Stopping).await;
    match terminate_gracefully(child, ctx.descriptor.kill_timeout()).await {
        Ok(outcome) => {
            tracing::debug!(app = %ctx.descriptor.name, instance = ctx.instance, ?outcome, "process terminated")
        }
        Err(err) => {
            tracing::warn!(app = %ctx.descriptor.name, instance = ctx.instance, error = %err, "failed to terminate process")
        }
    }
}

/// 等待重启延迟；期间收到停止请求返回 `true`
async fn wait_or_stop(delay: Duration, stop_rx: &mut watch::Receiver<bool>) -> bool {
    if *stop_rx.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        changed = stop_rx.changed() => changed.is_err() || *stop_rx.borrow(),
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}
