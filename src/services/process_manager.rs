use crate::models::{ProcessDescriptor, ProcessInfo};
use crate::services::log_writer::LogWriter;
use crate::services::supervisor::{supervise, InstanceContext};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("进程已在运行: {0}")]
    AlreadyRunning(String),
    #[error("进程不存在: {0}")]
    NotFound(String),
    #[error("日志文件不可写 {}: {source}", .path.display())]
    LogPathUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// `reload` 的结果，按进程名归类
///
/// 单个进程应用失败不影响其他进程，失败原因记录在 `failed` 里。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    pub started: Vec<String>,
    pub restarted: Vec<String>,
    pub stopped: Vec<String>,
    pub unchanged: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// 进程表：以 `name` 为键管理每个进程定义及其所有实例
pub struct ProcessManager {
    apps: Arc<Mutex<HashMap<String, ManagedApp>>>,
}

struct ManagedApp {
    descriptor: Arc<ProcessDescriptor>,
    instances: Vec<InstanceHandle>,
    /// 正在等待实例退出；此时条目仍占着名字，同名 `start` 会被拒绝
    stopping: bool,
}

impl ManagedApp {
    /// 所有实例的监督任务都已结束（Stopped / Errored）
    fn is_dead(&self) -> bool {
        self.instances.iter().all(|h| h.task.is_finished())
    }
}

struct InstanceHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    info: Arc<Mutex<ProcessInfo>>,
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessManager {
    pub fn new() -> Self {
        Self {
            apps: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 按定义启动所有实例
    ///
    /// 日志文件打不开时直接失败，不会拉起任何子进程。
    pub async fn start(&self, descriptor: ProcessDescriptor) -> Result<Vec<ProcessInfo>, ManagerError> {
        let logs = Self::open_logs(&descriptor)?;
        self.start_with_logs(descriptor, logs).await
    }

    fn open_logs(descriptor: &ProcessDescriptor) -> Result<Arc<LogWriter>, ManagerError> {
        LogWriter::open(&descriptor.name, &descriptor.logging)
            .map(Arc::new)
            .map_err(|(path, source)| ManagerError::LogPathUnwritable { path, source })
    }

    async fn start_with_logs(
        &self,
        descriptor: ProcessDescriptor,
        logs: Arc<LogWriter>,
    ) -> Result<Vec<ProcessInfo>, ManagerError> {
        let mut apps = self.apps.lock().await;
        if apps.contains_key(&descriptor.name) {
            return Err(ManagerError::AlreadyRunning(descriptor.name));
        }

        let descriptor = Arc::new(descriptor);
        let mut instances = Vec::with_capacity(descriptor.instances as usize);
        let mut infos = Vec::with_capacity(descriptor.instances as usize);
        for instance in 0..descriptor.instances {
            let info = ProcessInfo::new(descriptor.name.clone(), instance);
            infos.push(info.clone());
            let info = Arc::new(Mutex::new(info));

            let (stop_tx, stop_rx) = watch::channel(false);
            let ctx = InstanceContext {
                descriptor: descriptor.clone(),
                instance,
                logs: logs.clone(),
                info: info.clone(),
            };
            let task = tokio::spawn(supervise(ctx, stop_rx));
            instances.push(InstanceHandle { stop_tx, task, info });
        }

        tracing::info!(
            app = %descriptor.name,
            instances = descriptor.instances,
            command = %descriptor.command_line(),
            cwd = %descriptor.cwd.display(),
            "app started"
        );
        apps.insert(
            descriptor.name.clone(),
            ManagedApp {
                descriptor,
                instances,
                stopping: false,
            },
        );

        Ok(infos)
    }

    /// 停止并从进程表移除，等待所有实例按 kill timeout 结束
    ///
    /// 等待期间条目保留在表中，直到实例全部退出才移除。
    pub async fn stop(&self, name: &str) -> Result<(), ManagerError> {
        let instances = {
            let mut apps = self.apps.lock().await;
            let app = apps
                .get_mut(name)
                .filter(|app| !app.stopping)
                .ok_or_else(|| ManagerError::NotFound(name.to_string()))?;
            app.stopping = true;
            std::mem::take(&mut app.instances)
        };

        Self::shutdown(instances).await;
        self.apps.lock().await.remove(name);
        tracing::info!(app = name, "app stopped");
        Ok(())
    }

    /// 用当前定义重新启动（先停后启）
    pub async fn restart(&self, name: &str) -> Result<Vec<ProcessInfo>, ManagerError> {
        let descriptor = self
            .apps
            .lock()
            .await
            .get(name)
            .filter(|app| !app.stopping)
            .map(|app| app.descriptor.clone())
            .ok_or_else(|| ManagerError::NotFound(name.to_string()))?;

        self.replace(name, (*descriptor).clone()).await
    }

    /// 先打开新定义的日志文件，成功后才停掉旧实例，日志路径有误时旧进程保持运行
    async fn replace(&self, name: &str, descriptor: ProcessDescriptor) -> Result<Vec<ProcessInfo>, ManagerError> {
        let logs = Self::open_logs(&descriptor)?;
        self.stop(name).await?;
        self.start_with_logs(descriptor, logs).await
    }

    /// 应用新加载的定义：删除的停止，变化的重启，新增的启动，其余保持不动
    ///
    /// 定义未变但实例已全部退出的进程也会被重新拉起。
    pub async fn reload(&self, descriptors: Vec<ProcessDescriptor>) -> ReloadReport {
        let current: HashMap<String, (Arc<ProcessDescriptor>, bool)> = self
            .apps
            .lock()
            .await
            .iter()
            .filter(|(_, app)| !app.stopping)
            .map(|(name, app)| (name.clone(), (app.descriptor.clone(), app.is_dead())))
            .collect();
        let incoming: HashSet<&str> = descriptors.iter().map(|d| d.name.as_str()).collect();

        let mut report = ReloadReport::default();

        let mut removed: Vec<String> = current
            .keys()
            .filter(|name| !incoming.contains(name.as_str()))
            .cloned()
            .collect();
        removed.sort();
        for name in removed {
            match self.stop(&name).await {
                Ok(()) => report.stopped.push(name),
                Err(err) => report.failed.push((name, err.to_string())),
            }
        }

        for descriptor in descriptors {
            let name = descriptor.name.clone();
            let result = match current.get(&name) {
                Some((existing, false)) if **existing == descriptor => {
                    report.unchanged.push(name);
                    continue;
                }
                Some(_) => self.replace(&name, descriptor).await.map(|_| true),
                None => self.start(descriptor).await.map(|_| false),
            };
            match result {
                Ok(true) => report.restarted.push(name),
                Ok(false) => report.started.push(name),
                Err(err) => {
                    tracing::error!(app = %name, error = %err, "failed to apply reloaded descriptor");
                    report.failed.push((name, err.to_string()));
                }
            }
        }

        tracing::info!(
            started = report.started.len(),
            restarted = report.restarted.len(),
            stopped = report.stopped.len(),
            unchanged = report.unchanged.len(),
            failed = report.failed.len(),
            "reload applied"
        );
        report
    }

    /// 停止所有进程，各实例并行等待退出
    pub async fn stop_all(&self) {
        let instances: Vec<InstanceHandle> = {
            let mut apps = self.apps.lock().await;
            apps.values_mut()
                .filter(|app| !app.stopping)
                .flat_map(|app| {
                    app.stopping = true;
                    std::mem::take(&mut app.instances)
                })
                .collect()
        };
        Self::shutdown(instances).await;
        self.apps.lock().await.retain(|_, app| !app.stopping);
    }

    async fn shutdown(handles: Vec<InstanceHandle>) {
        for handle in &handles {
            // 任务已结束时没有接收端，忽略即可
            let _ = handle.stop_tx.send(true);
        }
        for handle in handles {
            if let Err(err) = handle.task.await {
                tracing::warn!(error = %err, "supervisor task ended abnormally");
            }
        }
    }

    /// 所有进程的状态，按名称和实例号排序
    pub async fn list(&self) -> Vec<ProcessInfo> {
        let handles: Vec<Arc<Mutex<ProcessInfo>>> = {
            let apps = self.apps.lock().await;
            apps.values()
                .flat_map(|app| app.instances.iter().map(|h| h.info.clone()))
                .collect()
        };

        let mut infos = Vec::with_capacity(handles.len());
        for info in handles {
            infos.push(info.lock().await.clone());
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name).then(a.instance.cmp(&b.instance)));
        infos
    }

    /// 进程表中的所有进程名，已排序
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.apps.lock().await.keys().cloned().collect();
        names.sort();
        names
    }
}
