use crate::models::ProcessInfo;
use crate::services::ReloadReport;
use crate::state::AppState;

/// 启动 ecosystem 文件中的进程并守护到收到退出信号
///
/// 单个进程启动失败只记录错误，继续启动其余进程。
pub async fn start(state: &AppState) -> anyhow::Result<()> {
    let descriptors = state.load_descriptors()?;
    if descriptors.is_empty() {
        anyhow::bail!("没有可启动的进程");
    }

    let mut started = 0;
    for descriptor in descriptors {
        let name = descriptor.name.clone();
        match state.process_manager.start(descriptor).await {
            Ok(_) => started += 1,
            Err(err) => tracing::error!(app = %name, error = %err, "failed to start app"),
        }
    }
    if started == 0 {
        anyhow::bail!("所有进程都启动失败");
    }

    wait_for_shutdown(state).await?;

    tracing::info!("stopping all apps");
    state.process_manager.stop_all().await;
    Ok(())
}

/// 重新读取 ecosystem 文件并按进程名应用变更；文件有误时保留当前进程不动并返回 `None`
pub async fn reload(state: &AppState) -> Option<ReloadReport> {
    let descriptors = match state.load_descriptors() {
        Ok(descriptors) => descriptors,
        Err(err) => {
            tracing::error!(error = %err, "reload rejected, keeping current apps");
            return None;
        }
    };

    let report = state.process_manager.reload(descriptors).await;
    for (name, reason) in &report.failed {
        tracing::error!(app = %name, reason = %reason, "app not reloaded");
    }
    tracing::info!(?report, "reload finished");
    Some(report)
}

/// 原地重启进程表中的所有进程，返回重启成功的进程名
pub async fn restart_all(state: &AppState) -> Vec<String> {
    let mut restarted = Vec::new();
    for name in state.process_manager.names().await {
        match state.process_manager.restart(&name).await {
            Ok(_) => restarted.push(name),
            Err(err) => tracing::error!(app = %name, error = %err, "restart failed"),
        }
    }
    restarted
}

pub async fn print_status(state: &AppState) {
    for info in state.process_manager.list().await {
        println!("{}", status_line(&info));
    }
}

pub fn status_line(info: &ProcessInfo) -> String {
    format!(
        "{:<24} #{:<2} {:<9} pid={:<8} restarts={:<3} since {}",
        info.name,
        info.instance,
        format!("{:?}", info.status).to_lowercase(),
        info.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
        info.restarts,
        info.started_at.to_rfc3339()
    )
}

#[cfg(unix)]
async fn wait_for_shutdown(state: &AppState) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut user1 = signal(SignalKind::user_defined1())?;
    let mut user2 = signal(SignalKind::user_defined2())?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT");
                return Ok(());
            }
            _ = terminate.recv() => {
                tracing::info!("received SIGTERM");
                return Ok(());
            }
            _ = hangup.recv() => {
                tracing::info!(file = %state.ecosystem_path.display(), "received SIGHUP, reloading");
                reload(state).await;
            }
            _ = user1.recv() => print_status(state).await,
            _ = user2.recv() => {
                tracing::info!("received SIGUSR2, restarting all apps");
                restart_all(state).await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_state: &AppState) -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("received Ctrl-C");
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::ProcessStatus;
    use std::path::Path;
    use std::time::Duration;

    const BOT: &str = r#"{ "name": "bot", "command": "sh", "arguments": ["-c", "sleep 30"], "workingDirectory": "." }"#;
    const WORKER: &str = r#"{ "name": "worker", "command": "sh", "arguments": ["-c", "sleep 30"], "workingDirectory": "." }"#;

    fn write_ecosystem(path: &Path, apps: &[&str]) {
        std::fs::write(path, format!(r#"{{ "apps": [{}] }}"#, apps.join(","))).unwrap();
    }

    async fn wait_running(state: &AppState, name: &str) -> ProcessInfo {
        for _ in 0..200 {
            let running = state
                .process_manager
                .list()
                .await
                .into_iter()
                .find(|info| info.name == name && info.status == ProcessStatus::Running);
            if let Some(info) = running {
                return info;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("{} never reached running", name);
    }

    async fn start_from_file(state: &AppState) {
        for descriptor in state.load_descriptors().unwrap() {
            state.process_manager.start(descriptor).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_reload_keeps_apps_when_file_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ecosystem.json");
        write_ecosystem(&path, &[BOT]);
        let state = AppState::new(path.clone(), Vec::new());
        start_from_file(&state).await;
        let before = wait_running(&state, "bot").await;

        std::fs::write(&path, "{ not json").unwrap();
        assert!(reload(&state).await.is_none());
        let after = wait_running(&state, "bot").await;
        assert_eq!(before.process_id, after.process_id);

        write_ecosystem(&path, &[BOT, WORKER]);
        let report = reload(&state).await.unwrap();
        assert_eq!(report.unchanged, vec!["bot"]);
        assert_eq!(report.started, vec!["worker"]);
        assert!(report.failed.is_empty());
        wait_running(&state, "worker").await;

        state.process_manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_restart_all_and_status_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ecosystem.json");
        write_ecosystem(&path, &[BOT]);
        let state = AppState::new(path, Vec::new());
        start_from_file(&state).await;
        let before = wait_running(&state, "bot").await;

        let line = status_line(&before);
        assert!(line.starts_with("bot"));
        assert!(line.contains("running"));
        assert!(line.contains(&format!("pid={}", before.pid.unwrap())));

        assert_eq!(restart_all(&state).await, vec!["bot"]);
        let after = wait_running(&state, "bot").await;
        assert_ne!(before.process_id, after.process_id);

        state.process_manager.stop_all().await;
    }
}
