use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    /// 每次拉起子进程都会换一个新的 id
    pub process_id: String,
    pub name: String,
    pub instance: u32,
    pub status: ProcessStatus,
    pub started_at: DateTime<Utc>,
    pub pid: Option<u32>,
    pub restarts: u32,
}

impl ProcessInfo {
    pub fn new(name: String, instance: u32) -> Self {
        Self {
            process_id: uuid::Uuid::new_v4().to_string(),
            name,
            instance,
            status: ProcessStatus::Starting,
            started_at: Utc::now(),
            pid: None,
            restarts: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
    Errored,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl LogStream {
    pub fn as_str(self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
        }
    }
}
