use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, TryRecvError};
use std::time::{Duration, Instant};

/// 监听工作目录的文件变更，只在 `watchFiles = true` 时创建
///
/// 事件经 `ignoreWatch` 和日志文件过滤后暂存，最后一个事件过去 `debounce` 后才报告，
/// 连续保存多个文件只会触发一次重启。
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    root: PathBuf,
    ignore: Vec<String>,
    ignored_files: Vec<PathBuf>,
    debounce: Duration,
    last_event_time: Option<Instant>,
    pending: Option<PathBuf>,
}

impl FileWatcher {
    /// `ignore` 按路径组件匹配（如 `node_modules`），`ignored_files` 按完整路径匹配，通常是落在工作目录里的日志文件
    pub fn new(
        root: &Path,
        ignore: &[String],
        ignored_files: Vec<PathBuf>,
        debounce: Duration,
    ) -> notify::Result<Self> {
        let (tx, rx) = channel();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )?;

        // 事件路径以监听时传入的根路径为前缀，统一用规范化路径比较
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        watcher.watch(&root, RecursiveMode::Recursive)?;

        Ok(Self {
            _watcher: watcher,
            rx,
            root,
            ignore: ignore.to_vec(),
            ignored_files: ignored_files
                .into_iter()
                .map(|f| f.canonicalize().unwrap_or(f))
                .collect(),
            debounce,
            last_event_time: None,
            pending: None,
        })
    }

    /// 取走已到达的事件；防抖期已过时返回第一个变更的路径
    pub fn poll_changes(&mut self) -> Option<PathBuf> {
        loop {
            match self.rx.try_recv() {
                Ok(Ok(event)) => {
                    if !is_change(&event) {
                        continue;
                    }
                    if let Some(path) = event.paths.into_iter().find(|p| !self.is_ignored(p)) {
                        self.pending.get_or_insert(path);
                        self.last_event_time = Some(Instant::now());
                    }
                }
                Ok(Err(err)) => {
                    tracing::debug!(root = %self.root.display(), error = %err, "file watcher error");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        match self.last_event_time {
            Some(last) if last.elapsed() >= self.debounce => {
                self.last_event_time = None;
                self.pending.take()
            }
            _ => None,
        }
    }

    fn is_ignored(&self, path: &Path) -> bool {
        if self.ignored_files.iter().any(|f| f == path) {
            return true;
        }
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        relative
            .components()
            .any(|c| self.ignore.iter().any(|pattern| c.as_os_str() == pattern.as_str()))
    }
}

fn is_change(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}
