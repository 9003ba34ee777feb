use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

static ENV_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("env reference pattern is valid")
});

/// 展开配置里的路径：开头的 `~` 换成用户主目录，`$VAR` / `${VAR}` 换成环境变量
///
/// 这样 ecosystem 文件里就不需要写死 `/home/<user>/...`。
/// 变量未设置、路径含 NUL 字符或使用 `~user` 写法都视为无效路径。
pub fn expand_path(input: &str) -> Result<PathBuf, String> {
    if input.contains('\0') {
        return Err("路径中包含 NUL 字符".to_string());
    }

    let mut missing = None;
    let substituted = ENV_REFERENCE.replace_all(input, |caps: &regex::Captures| {
        let key = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str()).unwrap_or_default();
        match std::env::var(key) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| key.to_string());
                String::new()
            }
        }
    });
    if let Some(key) = missing {
        return Err(format!("环境变量 {} 未设置", key));
    }

    let Some(rest) = substituted.strip_prefix('~') else {
        return Ok(PathBuf::from(substituted.as_ref()));
    };
    if !(rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\')) {
        return Err(format!("不支持的路径写法: {}", input));
    }

    let home = dirs_next::home_dir().ok_or("无法获取用户主目录".to_string())?;
    let rest = rest.trim_start_matches(['/', '\\']);
    Ok(if rest.is_empty() { home } else { home.join(rest) })
}

/// 相对路径以 `base` 为基准，绝对路径原样返回；结果中的 `.` 组件会被去掉
pub fn resolve_against(base: &Path, path: PathBuf) -> PathBuf {
    let joined = if path.is_absolute() { path } else { base.join(path) };
    joined.components().collect()
}

/// 按子进程将要使用的 PATH 查找可执行文件
///
/// 带路径分隔符的程序名按 `cwd` 解析，不查 PATH。
pub fn resolve_program(program: &str, cwd: &Path, path_var: Option<&str>) -> Option<PathBuf> {
    if program.contains('/') || program.contains('\\') {
        let candidate = resolve_against(cwd, PathBuf::from(program));
        return candidate.is_file().then_some(candidate);
    }

    let path_var = match path_var {
        Some(value) => value.to_string(),
        None => std::env::var("PATH").unwrap_or_default(),
    };

    std::env::split_paths(&path_var)
        .flat_map(|dir| executable_candidates(&dir, program))
        .find(|candidate| candidate.is_file())
}

#[cfg(not(target_os = "windows"))]
fn executable_candidates(dir: &Path, program: &str) -> Vec<PathBuf> {
    vec![dir.join(program)]
}

#[cfg(target_os = "windows")]
fn executable_candidates(dir: &Path, program: &str) -> Vec<PathBuf> {
    ["", ".exe", ".cmd", ".bat"]
        .iter()
        .map(|ext| dir.join(format!("{}{}", program, ext)))
        .collect()
}
