use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_INSTANCES: u32 = 1;
pub const DEFAULT_KILL_TIMEOUT_MS: u64 = 1600;
pub const DEFAULT_MAX_RESTARTS: u32 = 16;
pub const DEFAULT_MIN_UPTIME_MS: u64 = 1000;
pub const DEFAULT_RESTART_DELAY_MS: u64 = 0;
pub const DEFAULT_IGNORE_WATCH: &[&str] = &["node_modules", ".git", "__pycache__"];

/// ecosystem 文件中单个进程的原始定义
///
/// 字段名同时接受 camelCase 和 pm2 的写法（`script`、`cwd`、`max_memory_restart` 等），
/// 所有字段都是可选的，必填检查放在 `ConfigParser::normalize` 里做，这样才能报告具体缺了哪个字段。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDescriptor {
    pub name: Option<String>,
    #[serde(alias = "script")]
    pub command: Option<String>,
    #[serde(alias = "args")]
    pub arguments: Option<RawArguments>,
    #[serde(alias = "cwd")]
    pub working_directory: Option<String>,
    pub interpreter: Option<String>,
    #[serde(alias = "instances")]
    pub instance_count: Option<i64>,
    #[serde(alias = "autorestart")]
    pub auto_restart: Option<bool>,
    #[serde(alias = "watch")]
    pub watch_files: Option<bool>,
    #[serde(alias = "ignore_watch")]
    pub ignore_watch: Option<Vec<String>>,
    #[serde(alias = "max_memory_restart")]
    pub memory_restart_threshold: Option<RawByteSize>,
    #[serde(alias = "env")]
    pub environment: Option<Map<String, Value>>,
    #[serde(alias = "env_file")]
    pub env_file: Option<String>,
    #[serde(alias = "kill_timeout")]
    pub kill_timeout_ms: Option<u64>,
    #[serde(alias = "max_restarts")]
    pub max_restarts: Option<u32>,
    #[serde(alias = "min_uptime")]
    pub min_uptime_ms: Option<u64>,
    #[serde(alias = "restart_delay")]
    pub restart_delay_ms: Option<u64>,
    /// 新版写法：日志配置放在 `logging` 块中
    pub logging: Option<RawLogging>,
    // pm2 写法：日志字段直接平铺在顶层
    #[serde(alias = "error_file")]
    pub error_log_path: Option<String>,
    #[serde(alias = "out_file")]
    pub out_log_path: Option<String>,
    #[serde(alias = "log_date_format")]
    pub date_format: Option<String>,
    #[serde(alias = "merge_logs")]
    pub merge_streams: Option<bool>,
}

/// `args` 既可以是数组，也可以是一整行字符串（pm2 风格，如 `"-m bot.main"`）
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawArguments {
    List(Vec<String>),
    Line(String),
}

impl RawArguments {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            RawArguments::List(args) => args,
            RawArguments::Line(line) => line.split_whitespace().map(str::to_string).collect(),
        }
    }
}

/// 内存阈值：数字表示字节数，字符串如 `"500M"`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawByteSize {
    Bytes(u64),
    Text(String),
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawLogging {
    #[serde(alias = "error_file")]
    pub error_log_path: Option<String>,
    #[serde(alias = "out_file")]
    pub out_log_path: Option<String>,
    #[serde(alias = "log_date_format")]
    pub date_format: Option<String>,
    #[serde(alias = "merge_logs")]
    pub merge_streams: Option<bool>,
}

impl RawLogging {
    /// 逐字段合并，`preferred` 中有值的字段优先
    pub fn overlaid_with(self, preferred: Option<RawLogging>) -> RawLogging {
        let Some(preferred) = preferred else {
            return self;
        };
        RawLogging {
            error_log_path: preferred.error_log_path.or(self.error_log_path),
            out_log_path: preferred.out_log_path.or(self.out_log_path),
            date_format: preferred.date_format.or(self.date_format),
            merge_streams: preferred.merge_streams.or(self.merge_streams),
        }
    }
}

/// 校验并补全默认值后的进程定义，加载后不可变
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDescriptor {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub instances: u32,
    pub auto_restart: bool,
    pub watch: bool,
    pub ignore_watch: Vec<String>,
    pub max_memory_bytes: Option<u64>,
    pub env: BTreeMap<String, String>,
    pub logging: LogRouting,
    pub kill_timeout_ms: u64,
    pub max_restarts: u32,
    pub min_uptime_ms: u64,
    pub restart_delay_ms: u64,
}

impl ProcessDescriptor {
    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }

    pub fn min_uptime(&self) -> Duration {
        Duration::from_millis(self.min_uptime_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    /// 完整命令行，用于日志和 `validate` 输出
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogRouting {
    pub out: LogTarget,
    pub err: LogTarget,
    /// 已转换为 strftime 格式
    pub date_format: Option<String>,
    pub merged: bool,
}

impl Default for LogRouting {
    fn default() -> Self {
        Self {
            out: LogTarget::Console,
            err: LogTarget::Console,
            date_format: None,
            merged: false,
        }
    }
}

impl LogRouting {
    /// 没有任何日志配置时交给管理器默认处理（转发到控制台）
    pub fn is_default(&self) -> bool {
        *self == LogRouting::default()
    }

    pub fn file_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for target in [&self.out, &self.err] {
            if let LogTarget::File(path) = target {
                if !paths.contains(path) {
                    paths.push(path.clone());
                }
            }
        }
        paths
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "path", rename_all = "lowercase")]
pub enum LogTarget {
    Console,
    File(PathBuf),
}
