/// 进程树（自身 + 所有后代）的常驻内存总量，单位字节
///
/// 只在 Linux 上通过 procfs 读取，其他平台返回 `None`，内存阈值也就不会触发。
#[cfg(target_os = "linux")]
pub fn resident_bytes(pid: u32) -> Option<u64> {
    use procfs::process::{all_processes, Process};
    use std::collections::HashMap;

    let page_size = procfs::page_size();
    let root = Process::new(pid as i32).ok()?.stat().ok()?;

    let mut children: HashMap<i32, Vec<(i32, u64)>> = HashMap::new();
    if let Ok(processes) = all_processes() {
        for stat in processes.filter_map(|p| p.ok()).filter_map(|p| p.stat().ok()) {
            children
                .entry(stat.ppid)
                .or_default()
                .push((stat.pid, stat.rss * page_size));
        }
    }

    let mut total = root.rss * page_size;
    let mut pending = vec![root.pid];
    while let Some(parent) = pending.pop() {
        if let Some(kids) = children.get(&parent) {
            for (child_pid, rss) in kids {
                total += rss;
                pending.push(*child_pid);
            }
        }
    }
    Some(total)
}

#[cfg(not(target_os = "linux"))]
pub fn resident_bytes(_pid: u32) -> Option<u64> {
    None
}
