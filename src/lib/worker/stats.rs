use sysinfo::{Disks, System};

use super::types::{Allocation, Stats};

pub fn get_stats(sysinfo: &System, task_count: u64, queue_depth: u64, allocation: Allocation) -> Stats {
    let disks = Disks::new_with_refreshed_list();
    let total_disk: u64 = disks.iter().map(|disk| disk.total_space()).sum();
    let available_disk: u64 = disks.iter().map(|disk| disk.available_space()).sum();

    Stats {
        hostname: System::host_name().unwrap_or_else(|| "Unknown".to_string()),
        system_name: System::name().unwrap_or_else(|| "Unknown".to_string()),
        cpu_usage: (sysinfo.global_cpu_usage() * 100.0).round() / 100.0,
        total_cpus: sysinfo.cpus().len() as u64,
        total_memory: sysinfo.total_memory(),
        used_memory: sysinfo.used_memory(),
        total_disk,
        used_disk: total_disk.saturating_sub(available_disk),
        task_count,
        queue_depth,
        cpu_allocated: allocation.cpu,
        memory_allocated: allocation.memory,
        disk_allocated: allocation.disk,
    }
}
