use crate::models::ProcessDescriptor;
use std::path::PathBuf;
use std::time::Duration;

/// 一次运行结束（或即将被结束）的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitTrigger {
    /// 退出码为 0
    Exited,
    /// 非 0 退出码或被信号杀死
    Crashed { code: Option<i32>, signal: Option<i32> },
    SpawnFailed,
    MemoryExceeded { rss: u64, limit: u64 },
    FileChanged { path: PathBuf },
    OperatorStop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartDecision {
    Restart { delay: Duration },
    /// 事件不影响正在运行的进程
    Ignore,
    /// 不再拉起，但不是异常
    Halt,
    /// 连续快速崩溃次数超过上限
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct RestartPolicy {
    auto_restart: bool,
    watch: bool,
    max_restarts: u32,
    min_uptime: Duration,
    restart_delay: Duration,
}

impl From<&ProcessDescriptor> for RestartPolicy {
    fn from(descriptor: &ProcessDescriptor) -> Self {
        Self {
            auto_restart: descriptor.auto_restart,
            watch: descriptor.watch,
            max_restarts: descriptor.max_restarts,
            min_uptime: descriptor.min_uptime(),
            restart_delay: descriptor.restart_delay(),
        }
    }
}

impl RestartPolicy {
    pub fn min_uptime(&self) -> Duration {
        self.min_uptime
    }

    /// `unstable_restarts` 是包含本次在内、连续运行时间不足 `min_uptime` 的次数
    pub fn decide(&self, trigger: &ExitTrigger, uptime: Duration, unstable_restarts: u32) -> RestartDecision {
        match trigger {
            ExitTrigger::OperatorStop => RestartDecision::Halt,
            ExitTrigger::FileChanged { .. } => {
                if self.watch {
                    RestartDecision::Restart { delay: Duration::ZERO }
                } else {
                    RestartDecision::Ignore
                }
            }
            // 超过内存上限总是重启，与 autoRestart 无关
            ExitTrigger::MemoryExceeded { .. } => RestartDecision::Restart { delay: Duration::ZERO },
            ExitTrigger::Exited | ExitTrigger::Crashed { .. } | ExitTrigger::SpawnFailed => {
                if !self.auto_restart {
                    RestartDecision::Halt
                } else if uptime < self.min_uptime && unstable_restarts > self.max_restarts {
                    RestartDecision::GiveUp
                } else {
                    RestartDecision::Restart {
                        delay: self.restart_delay,
                    }
                }
            }
        }
    }
}
