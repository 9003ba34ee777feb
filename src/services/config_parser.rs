use crate::models::{
    LogRouting, LogTarget, ProcessDescriptor, RawByteSize, RawDescriptor, RawLogging,
    DEFAULT_IGNORE_WATCH, DEFAULT_INSTANCES, DEFAULT_KILL_TIMEOUT_MS, DEFAULT_MAX_RESTARTS,
    DEFAULT_MIN_UPTIME_MS, DEFAULT_RESTART_DELAY_MS,
};
use crate::utils::{expand_path, parse_byte_size, resolve_against, to_strftime};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("缺少必填字段: {0}")]
    MissingField(&'static str),
    #[error("字段 {field} 无效: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("无法解析内存阈值: {0}")]
    InvalidByteSize(String),
    #[error(
        "mergeStreams 开启时 outLogPath 与 errorLogPath 必须相同: {} != {}",
        .out.display(),
        .err.display()
    )]
    ConflictingLogPaths { out: PathBuf, err: PathBuf },
    #[error("进程名重复: {0}")]
    DuplicateName(String),
    #[error("配置中没有任何进程定义")]
    NoApps,
    #[error("读取 env 文件 {} 失败: {source}", .path.display())]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
    #[error("读取配置失败: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON 解析失败: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct ConfigParser;

impl ConfigParser {
    /// 加载 ecosystem 文件，若同目录存在 `<stem>.local.json` 则先合并覆盖
    pub fn load(path: &Path) -> Result<Vec<ProcessDescriptor>, DescriptorError> {
        let main_json = fs::read_to_string(path)?;
        let main: Value = serde_json::from_str(&main_json)?;

        let local_path = Self::local_overlay_path(path);
        let document = if local_path.exists() {
            tracing::info!(overlay = %local_path.display(), "merging local ecosystem overlay");
            let local_json = fs::read_to_string(&local_path)?;
            let local: Value = serde_json::from_str(&local_json)?;
            Self::merge_documents(&main, &local)?
        } else {
            main
        };

        let base_dir = Self::base_dir(path)?;
        Self::parse_document(&document, &base_dir)
    }

    /// 解析已读入的文档，相对路径以 `base_dir` 为基准
    pub fn parse_document(
        document: &Value,
        base_dir: &Path,
    ) -> Result<Vec<ProcessDescriptor>, DescriptorError> {
        let apps = Self::app_values(document)?;
        let mut names = HashSet::new();
        let mut descriptors = Vec::with_capacity(apps.len());

        for app in apps {
            let raw: RawDescriptor = serde_json::from_value(app)?;
            let descriptor = Self::normalize(raw, base_dir)?;
            if !names.insert(descriptor.name.clone()) {
                return Err(DescriptorError::DuplicateName(descriptor.name));
            }
            descriptors.push(descriptor);
        }

        Ok(descriptors)
    }

    /// 校验单个定义并补全默认值
    pub fn normalize(raw: RawDescriptor, base_dir: &Path) -> Result<ProcessDescriptor, DescriptorError> {
        let name = Self::required(raw.name, "name")?;
        let command = Self::required(raw.command, "command")?;
        let working_directory = Self::required(raw.working_directory, "workingDirectory")?;
        let cwd = resolve_against(base_dir, Self::expand(&working_directory, "workingDirectory")?);

        let mut args = raw.arguments.map(|a| a.into_vec()).unwrap_or_default();
        // interpreter 为 "none" 时直接执行 command（pm2 的约定）
        let program = match raw.interpreter.as_deref().map(str::trim) {
            Some(interpreter) if !interpreter.is_empty() && interpreter != "none" => {
                args.insert(0, command);
                interpreter.to_string()
            }
            _ => command,
        };

        let instances = match raw.instance_count {
            None => DEFAULT_INSTANCES,
            Some(count) if count >= 1 => u32::try_from(count).map_err(|_| DescriptorError::InvalidField {
                field: "instanceCount",
                reason: format!("{} 超出范围", count),
            })?,
            Some(count) => {
                return Err(DescriptorError::InvalidField {
                    field: "instanceCount",
                    reason: format!("必须 >= 1，实际为 {}", count),
                })
            }
        };

        let max_memory_bytes = match raw.memory_restart_threshold {
            None => None,
            Some(RawByteSize::Bytes(0)) => return Err(DescriptorError::InvalidByteSize("0".to_string())),
            Some(RawByteSize::Bytes(bytes)) => Some(bytes),
            Some(RawByteSize::Text(text)) => {
                Some(parse_byte_size(&text).ok_or(DescriptorError::InvalidByteSize(text))?)
            }
        };

        let env = Self::build_env(raw.env_file.as_deref(), raw.environment, &cwd)?;
        let inline_logging = RawLogging {
            error_log_path: raw.error_log_path,
            out_log_path: raw.out_log_path,
            date_format: raw.date_format,
            merge_streams: raw.merge_streams,
        };
        let logging = Self::resolve_logging(inline_logging.overlaid_with(raw.logging), base_dir)?;

        Ok(ProcessDescriptor {
            name,
            program,
            args,
            cwd,
            instances,
            auto_restart: raw.auto_restart.unwrap_or(true),
            watch: raw.watch_files.unwrap_or(false),
            ignore_watch: raw
                .ignore_watch
                .unwrap_or_else(|| DEFAULT_IGNORE_WATCH.iter().map(|s| s.to_string()).collect()),
            max_memory_bytes,
            env,
            logging,
            kill_timeout_ms: raw.kill_timeout_ms.unwrap_or(DEFAULT_KILL_TIMEOUT_MS),
            max_restarts: raw.max_restarts.unwrap_or(DEFAULT_MAX_RESTARTS),
            min_uptime_ms: raw.min_uptime_ms.unwrap_or(DEFAULT_MIN_UPTIME_MS),
            restart_delay_ms: raw.restart_delay_ms.unwrap_or(DEFAULT_RESTART_DELAY_MS),
        })
    }

    fn required(value: Option<String>, field: &'static str) -> Result<String, DescriptorError> {
        match value {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(DescriptorError::MissingField(field)),
        }
    }

    fn expand(input: &str, field: &'static str) -> Result<PathBuf, DescriptorError> {
        expand_path(input).map_err(|reason| DescriptorError::InvalidField { field, reason })
    }

    /// `.env` 中的变量先写入，descriptor 里显式声明的 `environment` 覆盖同名变量
    fn build_env(
        env_file: Option<&str>,
        environment: Option<serde_json::Map<String, Value>>,
        cwd: &Path,
    ) -> Result<BTreeMap<String, String>, DescriptorError> {
        let mut env = BTreeMap::new();

        let (dotenv_path, explicit) = match env_file {
            Some(file) => (resolve_against(cwd, Self::expand(file, "envFile")?), true),
            None => (cwd.join(".env"), false),
        };
        if explicit || dotenv_path.is_file() {
            let entries = dotenvy::from_path_iter(&dotenv_path).map_err(|source| DescriptorError::EnvFile {
                path: dotenv_path.clone(),
                source,
            })?;
            for entry in entries {
                let (key, value) = entry.map_err(|source| DescriptorError::EnvFile {
                    path: dotenv_path.clone(),
                    source,
                })?;
                env.insert(key, value);
            }
            tracing::debug!(path = %dotenv_path.display(), count = env.len(), "loaded env file");
        }

        for (key, value) in environment.unwrap_or_default() {
            let value = match value {
                Value::String(text) => text,
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                other => {
                    return Err(DescriptorError::InvalidField {
                        field: "environment",
                        reason: format!("{} 的值必须是字符串、数字或布尔值，实际为 {}", key, other),
                    })
                }
            };
            env.insert(key, value);
        }

        Ok(env)
    }

    fn resolve_logging(raw: RawLogging, base_dir: &Path) -> Result<LogRouting, DescriptorError> {
        let out = raw
            .out_log_path
            .map(|p| Self::expand(&p, "outLogPath").map(|path| resolve_against(base_dir, path)))
            .transpose()?;
        let err = raw
            .error_log_path
            .map(|p| Self::expand(&p, "errorLogPath").map(|path| resolve_against(base_dir, path)))
            .transpose()?;
        let date_format = raw
            .date_format
            .map(|f| to_strftime(&f).map_err(|reason| DescriptorError::InvalidField { field: "dateFormat", reason }))
            .transpose()?;
        let merged = raw.merge_streams.unwrap_or(false);

        let (out, err) = if merged {
            match (out, err) {
                (Some(out), Some(err)) if out != err => {
                    return Err(DescriptorError::ConflictingLogPaths { out, err })
                }
                (Some(path), _) | (None, Some(path)) => (LogTarget::File(path.clone()), LogTarget::File(path)),
                (None, None) => (LogTarget::Console, LogTarget::Console),
            }
        } else {
            (
                out.map_or(LogTarget::Console, LogTarget::File),
                err.map_or(LogTarget::Console, LogTarget::File),
            )
        };

        Ok(LogRouting {
            out,
            err,
            date_format,
            merged,
        })
    }

    /// 支持 `{ "apps": [...] }`、数组和单个对象三种写法
    fn app_values(document: &Value) -> Result<Vec<Value>, DescriptorError> {
        let apps = match document {
            Value::Object(obj) => match obj.get("apps") {
                Some(Value::Array(apps)) => apps.clone(),
                Some(_) => {
                    return Err(DescriptorError::InvalidField {
                        field: "apps",
                        reason: "必须是数组".to_string(),
                    })
                }
                None => vec![document.clone()],
            },
            Value::Array(apps) => apps.clone(),
            _ => {
                return Err(DescriptorError::InvalidField {
                    field: "apps",
                    reason: "顶层必须是对象或数组".to_string(),
                })
            }
        };

        if apps.is_empty() {
            return Err(DescriptorError::NoApps);
        }
        Ok(apps)
    }

    fn local_overlay_path(path: &Path) -> PathBuf {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "ecosystem".to_string());
        path.with_file_name(format!("{}.local.json", stem))
    }

    fn base_dir(path: &Path) -> Result<PathBuf, DescriptorError> {
        let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
        let dir = match parent {
            Some(parent) if parent.is_absolute() => parent.to_path_buf(),
            Some(parent) => std::env::current_dir()?.join(parent),
            None => std::env::current_dir()?,
        };
        Ok(dir)
    }

    /// 本地覆盖文件按 `name` 合并到对应的进程定义，未匹配的追加到末尾
    fn merge_documents(main: &Value, local: &Value) -> Result<Value, DescriptorError> {
        let mut apps = Self::app_values(main)?;
        for overlay in Self::app_values(local)? {
            let name = overlay.get("name").and_then(|v| v.as_str());
            let existing = name.and_then(|name| {
                apps.iter()
                    .position(|app| app.get("name").and_then(|v| v.as_str()) == Some(name))
            });
            match existing {
                Some(index) => apps[index] = Self::merge_json(&apps[index], &overlay),
                None => apps.push(overlay),
            }
        }
        Ok(serde_json::json!({ "apps": apps }))
    }

    fn merge_json(base: &Value, overlay: &Value) -> Value {
        match (base, overlay) {
            (Value::Object(base_obj), Value::Object(overlay_obj)) => {
                let mut merged = base_obj.clone();
                for (key, value) in overlay_obj {
                    let new_value = if let Some(existing) = merged.get(key) {
                        Self::merge_json(existing, value)
                    } else {
                        value.clone()
                    };
                    merged.insert(key.clone(), new_value);
                }
                Value::Object(merged)
            }
            (_, Value::Null) => base.clone(),
            (_, overlay_value) => overlay_value.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse_one(value: Value) -> Result<ProcessDescriptor, DescriptorError> {
        let dir = tempfile::tempdir().unwrap();
        ConfigParser::parse_document(&value, dir.path()).map(|mut apps| apps.remove(0))
    }

    fn minimal() -> Value {
        json!({ "name": "voice-journal-bot", "command": "python", "workingDirectory": "/srv/bot" })
    }

    #[test]
    fn test_minimal_descriptor_gets_defaults() {
        let descriptor = parse_one(minimal()).unwrap();
        assert_eq!(descriptor.name, "voice-journal-bot");
        assert_eq!(descriptor.program, "python");
        assert!(descriptor.args.is_empty());
        assert_eq!(descriptor.cwd, PathBuf::from("/srv/bot"));
        assert_eq!(descriptor.instances, 1);
        assert!(descriptor.auto_restart);
        assert!(!descriptor.watch);
        assert_eq!(descriptor.max_memory_bytes, None);
        assert_eq!(descriptor.kill_timeout_ms, DEFAULT_KILL_TIMEOUT_MS);
        assert_eq!(descriptor.max_restarts, DEFAULT_MAX_RESTARTS);
        assert_eq!(descriptor.ignore_watch, vec!["node_modules", ".git", "__pycache__"]);
        assert!(descriptor.logging.is_default());
    }

    #[test]
    fn test_pm2_style_descriptor() {
        let descriptor = parse_one(json!({
            "name": "voice-journal-bot",
            "script": "python",
            "args": "-m bot.main",
            "cwd": "./",
            "interpreter": "none",
            "instances": 1,
            "autorestart": true,
            "watch": false,
            "max_memory_restart": "500M",
            "env": { "PYTHONUNBUFFERED": "1" }
        }))
        .unwrap();

        assert_eq!(descriptor.program, "python");
        assert_eq!(descriptor.args, vec!["-m", "bot.main"]);
        assert!(descriptor.cwd.is_absolute());
        assert_eq!(descriptor.max_memory_bytes, Some(500 * 1024 * 1024));
        assert_eq!(descriptor.env.get("PYTHONUNBUFFERED").map(String::as_str), Some("1"));
        assert_eq!(descriptor.command_line(), "python -m bot.main");
    }

    #[test]
    fn test_current_dir_cwd_is_normalized() {
        let mut value = minimal();
        value["workingDirectory"] = json!("./");
        let descriptor = ConfigParser::parse_document(&value, Path::new("/srv/bot")).unwrap().remove(0);
        assert_eq!(descriptor.cwd.display().to_string(), "/srv/bot");
    }

    #[test]
    fn test_interpreter_is_prepended() {
        let mut value = minimal();
        value["command"] = json!("bot/main.py");
        value["interpreter"] = json!("python3");
        value["arguments"] = json!(["--verbose"]);
        let descriptor = parse_one(value).unwrap();
        assert_eq!(descriptor.program, "python3");
        assert_eq!(descriptor.args, vec!["bot/main.py", "--verbose"]);
    }

    #[test]
    fn test_missing_required_fields() {
        for field in ["name", "command", "workingDirectory"] {
            let mut value = minimal();
            value.as_object_mut().unwrap().remove(field);
            match parse_one(value) {
                Err(DescriptorError::MissingField(missing)) => assert_eq!(missing, field),
                other => panic!("expected missing {}, got {:?}", field, other),
            }
        }

        let mut blank = minimal();
        blank["name"] = json!("  ");
        assert!(matches!(parse_one(blank), Err(DescriptorError::MissingField("name"))));
    }

    #[test]
    fn test_memory_threshold_validation() {
        let mut value = minimal();
        value["memoryRestartThreshold"] = json!("lots");
        assert!(matches!(parse_one(value), Err(DescriptorError::InvalidByteSize(input)) if input == "lots"));

        let mut value = minimal();
        value["memoryRestartThreshold"] = json!(1_048_576);
        assert_eq!(parse_one(value).unwrap().max_memory_bytes, Some(1_048_576));
    }

    #[test]
    fn test_instance_count_must_be_positive() {
        let mut value = minimal();
        value["instanceCount"] = json!(0);
        assert!(matches!(
            parse_one(value),
            Err(DescriptorError::InvalidField { field: "instanceCount", .. })
        ));
    }

    #[test]
    fn test_merge_streams_with_different_paths_rejected() {
        let mut value = minimal();
        value["logging"] = json!({
            "outLogPath": "/var/log/bot/out.log",
            "errorLogPath": "/var/log/bot/err.log",
            "mergeStreams": true
        });
        assert!(matches!(parse_one(value), Err(DescriptorError::ConflictingLogPaths { .. })));
    }

    #[test]
    fn test_merge_streams_with_single_path() {
        let mut value = minimal();
        value["logging"] = json!({ "outLogPath": "/var/log/bot/combined.log", "mergeStreams": true });
        let logging = parse_one(value).unwrap().logging;
        let path = PathBuf::from("/var/log/bot/combined.log");
        assert_eq!(logging.out, LogTarget::File(path.clone()));
        assert_eq!(logging.err, LogTarget::File(path));
        assert!(logging.merged);
    }

    #[test]
    fn test_full_logging_variant() {
        let mut value = minimal();
        value["logging"] = json!({
            "outLogPath": "logs/out.log",
            "errorLogPath": "logs/err.log",
            "dateFormat": "YYYY-MM-DD HH:mm:ss Z",
            "mergeStreams": false
        });
        value["killTimeoutMs"] = json!(5000);
        let descriptor = parse_one(value).unwrap();
        assert!(!descriptor.logging.is_default());
        assert_eq!(descriptor.logging.date_format.as_deref(), Some("%Y-%m-%d %H:%M:%S %:z"));
        assert!(matches!(&descriptor.logging.out, LogTarget::File(p) if p.ends_with("logs/out.log")));
        assert!(matches!(&descriptor.logging.err, LogTarget::File(p) if p.ends_with("logs/err.log")));
        assert_eq!(descriptor.kill_timeout_ms, 5000);
    }

    #[test]
    fn test_pm2_flat_logging_fields() {
        let mut value = minimal();
        value["error_file"] = json!("/tmp/bot-err.log");
        value["out_file"] = json!("/tmp/bot-out.log");
        value["log_date_format"] = json!("%H:%M");
        let logging = parse_one(value).unwrap().logging;
        assert_eq!(logging.err, LogTarget::File(PathBuf::from("/tmp/bot-err.log")));
        assert_eq!(logging.out, LogTarget::File(PathBuf::from("/tmp/bot-out.log")));
        assert_eq!(logging.date_format.as_deref(), Some("%H:%M"));
    }

    #[test]
    fn test_environment_values_are_stringified() {
        let mut value = minimal();
        value["env"] = json!({ "PORT": 8080, "DEBUG": true });
        let env = parse_one(value).unwrap().env;
        assert_eq!(env["PORT"], "8080");
        assert_eq!(env["DEBUG"], "true");

        let mut value = minimal();
        value["env"] = json!({ "NESTED": { "a": 1 } });
        assert!(matches!(parse_one(value), Err(DescriptorError::InvalidField { field: "environment", .. })));
    }

    #[test]
    fn test_dotenv_is_loaded_and_overridden() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".env"), "TELEGRAM_TOKEN=abc\nPYTHONUNBUFFERED=0\n").unwrap();

        let value = json!({
            "name": "bot",
            "command": "python",
            "cwd": ".",
            "env": { "PYTHONUNBUFFERED": "1" }
        });
        let descriptor = ConfigParser::parse_document(&value, dir.path()).unwrap().remove(0);
        assert_eq!(descriptor.env["TELEGRAM_TOKEN"], "abc");
        assert_eq!(descriptor.env["PYTHONUNBUFFERED"], "1");
    }

    #[test]
    fn test_explicit_env_file_must_exist() {
        let mut value = minimal();
        value["envFile"] = json!("/nonexistent/launcher/.env");
        assert!(matches!(parse_one(value), Err(DescriptorError::EnvFile { .. })));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let value = json!({ "apps": [minimal(), minimal()] });
        assert!(matches!(
            ConfigParser::parse_document(&value, dir.path()),
            Err(DescriptorError::DuplicateName(name)) if name == "voice-journal-bot"
        ));
    }

    #[test]
    fn test_document_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let mut second = minimal();
        second["name"] = json!("worker");

        let wrapped = json!({ "apps": [minimal(), second.clone()] });
        let bare = json!([minimal(), second]);
        assert_eq!(ConfigParser::parse_document(&wrapped, dir.path()).unwrap().len(), 2);
        assert_eq!(ConfigParser::parse_document(&bare, dir.path()).unwrap().len(), 2);
        assert_eq!(ConfigParser::parse_document(&minimal(), dir.path()).unwrap().len(), 1);
        assert!(matches!(
            ConfigParser::parse_document(&json!({ "apps": [] }), dir.path()),
            Err(DescriptorError::NoApps)
        ));
    }

    #[test]
    fn test_load_merges_local_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let main_path = dir.path().join("ecosystem.json");
        fs::write(
            &main_path,
            serde_json::to_string(&json!({
                "apps": [{
                    "name": "bot",
                    "script": "python",
                    "args": "-m bot.main",
                    "cwd": "/home/your-user/bot",
                    "max_memory_restart": "500M"
                }]
            }))
            .unwrap(),
        )
        .unwrap();
        fs::write(
            dir.path().join("ecosystem.local.json"),
            serde_json::to_string(&json!({
                "apps": [{ "name": "bot", "cwd": "app", "max_memory_restart": null }]
            }))
            .unwrap(),
        )
        .unwrap();

        let descriptors = ConfigParser::load(&main_path).unwrap();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].cwd, dir.path().join("app"));
        assert_eq!(descriptors[0].max_memory_bytes, Some(500 * 1024 * 1024));
    }

    #[test]
    fn test_load_missing_file() {
        let result = ConfigParser::load(Path::new("/nonexistent/ecosystem.json"));
        assert!(matches!(result, Err(DescriptorError::Io(_))));
    }

    #[test]
    fn test_merge_json_overlay_wins() {
        let base = json!({ "a": 1, "nested": { "x": 1, "y": 2 } });
        let overlay = json!({ "nested": { "y": 3 }, "b": null });
        let merged = ConfigParser::merge_json(&base, &overlay);
        assert_eq!(merged, json!({ "a": 1, "nested": { "x": 1, "y": 3 }, "b": null }));
    }
}
