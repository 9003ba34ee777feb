use crate::models::ProcessDescriptor;
use crate::services::{ConfigParser, DescriptorError, ProcessManager};
use std::path::PathBuf;

pub struct AppState {
    pub ecosystem_path: PathBuf,
    /// 只管理这些进程；为空表示全部
    pub only: Vec<String>,
    pub process_manager: ProcessManager,
}

impl AppState {
    pub fn new(ecosystem_path: PathBuf, only: Vec<String>) -> Self {
        Self {
            ecosystem_path,
            only,
            process_manager: ProcessManager::new(),
        }
    }

    /// 每次都重新读取 ecosystem 文件，`reload` 依赖这一点
    pub fn load_descriptors(&self) -> Result<Vec<ProcessDescriptor>, DescriptorError> {
        let descriptors = ConfigParser::load(&self.ecosystem_path)?;
        if self.only.is_empty() {
            return Ok(descriptors);
        }

        for name in &self.only {
            if !descriptors.iter().any(|d| &d.name == name) {
                tracing::warn!(app = %name, "--only names an app that is not in the ecosystem file");
            }
        }
        Ok(descriptors
            .into_iter()
            .filter(|d| self.only.contains(&d.name))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_filters_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ecosystem.json");
        std::fs::write(
            &path,
            r#"{ "apps": [
                { "name": "bot", "script": "python", "cwd": "." },
                { "name": "worker", "script": "python", "cwd": "." }
            ] }"#,
        )
        .unwrap();

        let all = AppState::new(path.clone(), Vec::new()).load_descriptors().unwrap();
        assert_eq!(all.len(), 2);

        let only = AppState::new(path, vec!["worker".to_string()]).load_descriptors().unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].name, "worker");
    }
}
