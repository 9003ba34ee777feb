use chrono::format::{Item, StrftimeItems};
use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;

static MOMENT_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"YYYY|YY|SSS|MM|DD|HH|hh|mm|ss|ZZ|Z|A").expect("moment token pattern is valid")
});

/// 把日志时间格式统一转换成 strftime
///
/// 含 `%` 的按 strftime 原样使用；否则当作 pm2 的 moment 风格（`YYYY-MM-DD HH:mm:ss Z`）转换。
/// 转换后的格式如果 chrono 无法识别则返回错误。
pub fn to_strftime(format: &str) -> Result<String, String> {
    let trimmed = format.trim();
    if trimmed.is_empty() {
        return Err("日期格式不能为空".to_string());
    }

    let converted = if trimmed.contains('%') {
        trimmed.to_string()
    } else {
        MOMENT_TOKEN
            .replace_all(trimmed, |caps: &regex::Captures| {
                match &caps[0] {
                    "YYYY" => "%Y",
                    "YY" => "%y",
                    "SSS" => "%3f",
                    "MM" => "%m",
                    "DD" => "%d",
                    "HH" => "%H",
                    "hh" => "%I",
                    "mm" => "%M",
                    "ss" => "%S",
                    "ZZ" => "%z",
                    "Z" => "%:z",
                    "A" => "%p",
                    _ => "",
                }
                .to_string()
            })
            .into_owned()
    };

    if StrftimeItems::new(&converted).any(|item| matches!(item, Item::Error)) {
        return Err(format!("无法识别的日期格式: {}", format));
    }
    Ok(converted)
}

/// 以本地时间格式化当前时刻，`format` 必须已经过 `to_strftime` 校验
pub fn format_now(format: &str) -> String {
    Local::now().format(format).to_string()
}
