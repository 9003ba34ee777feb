use crate::models::{LogRouting, LogStream, LogTarget};
use crate::utils::format_now;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

enum Sink {
    /// 管理器默认处理：带进程名前缀转发到本进程的 stdout/stderr
    Console,
    File { path: PathBuf, file: Arc<Mutex<File>> },
}

/// 把子进程输出按 `LogRouting` 写到控制台或日志文件
///
/// 同一路径只打开一次，合并模式下 stdout/stderr 共用同一个文件句柄，按整行交错写入。
pub struct LogWriter {
    name: String,
    out: Sink,
    err: Sink,
    date_format: Option<String>,
}

impl LogWriter {
    /// 以追加模式打开（必要时创建）日志文件，失败时返回出错的路径
    pub fn open(name: &str, routing: &LogRouting) -> Result<Self, (PathBuf, std::io::Error)> {
        let out = Self::open_sink(&routing.out, None)?;
        let err = Self::open_sink(&routing.err, Some(&out))?;

        Ok(Self {
            name: name.to_string(),
            out,
            err,
            date_format: routing.date_format.clone(),
        })
    }

    fn open_sink(target: &LogTarget, shared: Option<&Sink>) -> Result<Sink, (PathBuf, std::io::Error)> {
        let path = match target {
            LogTarget::Console => return Ok(Sink::Console),
            LogTarget::File(path) => path,
        };

        if let Some(Sink::File { path: existing, file }) = shared {
            if existing == path {
                return Ok(Sink::File {
                    path: path.clone(),
                    file: file.clone(),
                });
            }
        }

        let file = open_append(path).map_err(|e| (path.clone(), e))?;
        Ok(Sink::File {
            path: path.clone(),
            file: Arc::new(Mutex::new(File::from_std(file))),
        })
    }

    pub fn format_line(&self, line: &str) -> String {
        match &self.date_format {
            Some(format) => format!("{}: {}\n", format_now(format), line),
            None => format!("{}\n", line),
        }
    }

    pub async fn write_line(&self, stream: LogStream, line: &str) {
        let sink = match stream {
            LogStream::Stdout => &self.out,
            LogStream::Stderr => &self.err,
        };
        let formatted = self.format_line(line);

        match sink {
            Sink::Console => match stream {
                LogStream::Stdout => print!("{}| {}", self.name, formatted),
                LogStream::Stderr => eprint!("{}| {}", self.name, formatted),
            },
            Sink::File { path, file } => {
                let mut file = file.lock().await;
                if let Err(err) = file.write_all(formatted.as_bytes()).await {
                    tracing::warn!(
                        app = %self.name,
                        path = %path.display(),
                        stream = stream.as_str(),
                        error = %err,
                        "failed to write log line"
                    );
                    return;
                }
                let _ = file.flush().await;
            }
        }
    }
}

fn open_append(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routing(out: LogTarget, err: LogTarget, date_format: Option<&str>) -> LogRouting {
        LogRouting {
            out,
            err,
            date_format: date_format.map(str::to_string),
            merged: false,
        }
    }

    #[tokio::test]
    async fn test_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("logs/out.log");
        let err = dir.path().join("logs/err.log");
        let writer = LogWriter::open(
            "bot",
            &routing(LogTarget::File(out.clone()), LogTarget::File(err.clone()), None),
        )
        .unwrap();

        writer.write_line(LogStream::Stdout, "started").await;
        writer.write_line(LogStream::Stderr, "warning").await;

        assert_eq!(std::fs::read_to_string(&out).unwrap(), "started\n");
        assert_eq!(std::fs::read_to_string(&err).unwrap(), "warning\n");
    }

    #[tokio::test]
    async fn test_merged_streams_interleave_in_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("combined.log");
        let mut routing = routing(LogTarget::File(path.clone()), LogTarget::File(path.clone()), None);
        routing.merged = true;
        let writer = LogWriter::open("bot", &routing).unwrap();

        writer.write_line(LogStream::Stdout, "one").await;
        writer.write_line(LogStream::Stderr, "two").await;
        writer.write_line(LogStream::Stdout, "three").await;

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\nthree\n");
    }

    #[tokio::test]
    async fn test_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        std::fs::write(&path, "previous\n").unwrap();
        let writer = LogWriter::open("bot", &routing(LogTarget::File(path.clone()), LogTarget::Console, None)).unwrap();

        writer.write_line(LogStream::Stdout, "next").await;

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "previous\nnext\n");
    }

    #[test]
    fn test_date_prefix() {
        let writer = LogWriter::open("bot", &routing(LogTarget::Console, LogTarget::Console, Some("%Y"))).unwrap();
        let line = writer.format_line("hello");
        let (stamp, rest) = line.split_once(": ").unwrap();
        assert_eq!(stamp.len(), 4);
        assert_eq!(rest, "hello\n");

        let plain = LogWriter::open("bot", &LogRouting::default()).unwrap();
        assert_eq!(plain.format_line("hello"), "hello\n");
    }

    #[test]
    fn test_unwritable_path_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let target = blocker.join("out.log");

        let result = LogWriter::open("bot", &routing(LogTarget::File(target.clone()), LogTarget::Console, None));
        match result {
            Err((path, _)) => assert_eq!(path, target),
            Ok(_) => panic!("expected open to fail"),
        }
    }
}
