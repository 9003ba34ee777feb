use crate::models::{LogTarget, ProcessDescriptor};
use crate::services::ConfigParser;
use crate::utils::{format_byte_size, resolve_program};
use anyhow::Context;
use std::path::Path;

/// 校验 ecosystem 文件，每个进程输出一行摘要
pub fn validate(path: &Path) -> anyhow::Result<()> {
    let descriptors =
        ConfigParser::load(path).with_context(|| format!("校验 {} 失败", path.display()))?;

    for descriptor in &descriptors {
        println!("{}", summarize(descriptor));

        // 以下问题要到启动时才是致命的，这里只提醒
        if !descriptor.cwd.is_dir() {
            tracing::warn!(app = %descriptor.name, cwd = %descriptor.cwd.display(), "working directory does not exist");
        }
        let path_var = descriptor.env.get("PATH").map(String::as_str);
        if resolve_program(&descriptor.program, &descriptor.cwd, path_var).is_none() {
            tracing::warn!(app = %descriptor.name, program = %descriptor.program, "executable not found");
        }
    }

    println!("{}: {} 个进程定义校验通过", path.display(), descriptors.len());
    Ok(())
}

/// 输出补全默认值后的定义
pub fn show(path: &Path) -> anyhow::Result<()> {
    let descriptors =
        ConfigParser::load(path).with_context(|| format!("读取 {} 失败", path.display()))?;
    println!("{}", serde_json::to_string_pretty(&descriptors)?);
    Ok(())
}

pub fn summarize(descriptor: &ProcessDescriptor) -> String {
    let memory = descriptor
        .max_memory_bytes
        .map(format_byte_size)
        .unwrap_or_else(|| "-".to_string());

    let logs = if descriptor.logging.is_default() {
        "console".to_string()
    } else if descriptor.logging.merged {
        format!("merged:{}", describe_target(&descriptor.logging.out))
    } else {
        format!(
            "out:{} err:{}",
            describe_target(&descriptor.logging.out),
            describe_target(&descriptor.logging.err)
        )
    };

    format!(
        "{} [{}] cwd={} instances={} autorestart={} watch={} memory={} kill_timeout={}ms logs={}",
        descriptor.name,
        descriptor.command_line(),
        descriptor.cwd.display(),
        descriptor.instances,
        descriptor.auto_restart,
        descriptor.watch,
        memory,
        descriptor.kill_timeout_ms,
        logs
    )
}

fn describe_target(target: &LogTarget) -> String {
    match target {
        LogTarget::Console => "console".to_string(),
        LogTarget::File(path) => path.display().to_string(),
    }
}
