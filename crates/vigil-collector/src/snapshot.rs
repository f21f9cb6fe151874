//! One-shot capture of host state.
//!
//! A capture is synchronous and bounded: the only deliberate wait is the CPU
//! sampling window (1 s between the two utilization readings). Async callers
//! go through [`SystemProber::capture_async`], which moves the capture onto
//! the blocking pool.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sysinfo::{Disks, Networks, System};

/// Toggles for the built-in capture sections, driven by the `collect.system`
/// config block. A disabled section stays zeroed in the snapshot.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub cpu: bool,
    pub memory: bool,
    pub disk: bool,
    pub network: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            cpu: true,
            memory: true,
            disk: true,
            network: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostProbe {
    pub hostname: String,
    pub os: String,
    pub platform: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuProbe {
    pub usage_percent: f64,
    pub count: usize,
    /// 1/5/15-minute load averages; absent on Windows.
    pub load_avg: Option<[f64; 3]>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryProbe {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskIoTotals {
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_ops: u64,
    pub write_ops: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskProbe {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub usage_percent: f64,
    pub io: DiskIoTotals,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkProbe {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
}

/// Immutable result of one capture. Built-in key extractors are pure
/// projections over this.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemSnapshot {
    pub timestamp: DateTime<Utc>,
    pub host: HostProbe,
    pub cpu: CpuProbe,
    pub memory: MemoryProbe,
    pub disk: DiskProbe,
    pub network: NetworkProbe,
}

/// CPU utilization needs two readings separated by a sampling window.
const CPU_SAMPLE_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default)]
pub struct SystemProber {
    config: ProbeConfig,
}

impl SystemProber {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    /// Capture a snapshot. Costs roughly the CPU sampling window when the cpu
    /// section is enabled; the snapshot timestamp is the completion time.
    pub fn capture(&self) -> SystemSnapshot {
        let cpu = if self.config.cpu {
            capture_cpu()
        } else {
            CpuProbe::default()
        };
        let memory = if self.config.memory {
            capture_memory()
        } else {
            MemoryProbe::default()
        };
        let disk = if self.config.disk {
            capture_disk()
        } else {
            DiskProbe::default()
        };
        let network = if self.config.network {
            capture_network()
        } else {
            NetworkProbe::default()
        };

        SystemSnapshot {
            timestamp: Utc::now(),
            host: capture_host(),
            cpu,
            memory,
            disk,
            network,
        }
    }

    pub async fn capture_async(&self) -> SystemSnapshot {
        let prober = self.clone();
        tokio::task::spawn_blocking(move || prober.capture())
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Snapshot capture task failed");
                SystemSnapshot {
                    timestamp: Utc::now(),
                    host: HostProbe::default(),
                    cpu: CpuProbe::default(),
                    memory: MemoryProbe::default(),
                    disk: DiskProbe::default(),
                    network: NetworkProbe::default(),
                }
            })
    }
}

fn capture_host() -> HostProbe {
    HostProbe {
        hostname: System::host_name().unwrap_or_default(),
        os: std::env::consts::OS.to_string(),
        platform: format!(
            "{}-{}",
            System::name().unwrap_or_else(|| std::env::consts::OS.to_string()),
            System::os_version().unwrap_or_else(|| "unknown".to_string()),
        ),
        uptime_secs: System::uptime(),
    }
}

fn capture_cpu() -> CpuProbe {
    let mut system = System::new();
    system.refresh_cpu_usage();
    std::thread::sleep(CPU_SAMPLE_WINDOW);
    system.refresh_cpu_usage();

    let load_avg = if cfg!(windows) {
        None
    } else {
        let load = System::load_average();
        Some([load.one, load.five, load.fifteen])
    };

    CpuProbe {
        usage_percent: system.global_cpu_usage() as f64,
        count: system.cpus().len(),
        load_avg,
    }
}

fn capture_memory() -> MemoryProbe {
    let mut system = System::new();
    system.refresh_memory();

    let total = system.total_memory();
    let used = system.used_memory();
    MemoryProbe {
        total,
        used,
        free: system.free_memory(),
        usage_percent: percent(used, total),
    }
}

fn capture_disk() -> DiskProbe {
    let disks = Disks::new_with_refreshed_list();

    let mut total = 0u64;
    let mut free = 0u64;
    let mut read_bytes = 0u64;
    let mut write_bytes = 0u64;
    for disk in disks.iter() {
        let mount = disk.mount_point().to_string_lossy();
        // Skip virtual/pseudo filesystems (snap, tmpfs, overlay, etc.)
        if mount.starts_with("/snap/")
            || mount.starts_with("/sys/")
            || mount.starts_with("/proc/")
            || mount.starts_with("/dev/")
            || mount.starts_with("/run/")
            || disk.total_space() == 0
        {
            continue;
        }
        total += disk.total_space();
        free += disk.available_space();
        let usage = disk.usage();
        read_bytes += usage.total_read_bytes;
        write_bytes += usage.total_written_bytes;
    }

    let used = total.saturating_sub(free);
    let (read_ops, write_ops) = capture_disk_ops();

    DiskProbe {
        total,
        used,
        free,
        usage_percent: percent(used, total),
        io: DiskIoTotals {
            read_bytes,
            write_bytes,
            read_ops,
            write_ops,
        },
    }
}

/// Completed read/write operation counts. `sysinfo` only reports byte totals,
/// so these come from /proc/diskstats on Linux and stay zero elsewhere.
#[cfg(target_os = "linux")]
fn capture_disk_ops() -> (u64, u64) {
    let content = match std::fs::read_to_string("/proc/diskstats") {
        Ok(c) => c,
        Err(_) => return (0, 0),
    };

    let mut reads = 0u64;
    let mut writes = 0u64;
    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 {
            continue;
        }
        let name = fields[2];
        if name.starts_with("loop") || name.starts_with("ram") || name.starts_with("dm-") {
            continue;
        }
        reads += fields[3].parse::<u64>().unwrap_or(0);
        writes += fields[7].parse::<u64>().unwrap_or(0);
    }
    (reads, writes)
}

#[cfg(not(target_os = "linux"))]
fn capture_disk_ops() -> (u64, u64) {
    (0, 0)
}

fn capture_network() -> NetworkProbe {
    let networks = Networks::new_with_refreshed_list();

    let mut probe = NetworkProbe::default();
    for (_name, data) in networks.iter() {
        let loopback = data
            .ip_networks()
            .iter()
            .any(|ip| ip.addr.is_loopback());
        if loopback {
            continue;
        }
        probe.bytes_sent += data.total_transmitted();
        probe.bytes_recv += data.total_received();
        probe.packets_sent += data.total_packets_transmitted();
        probe.packets_recv += data.total_packets_received();
    }
    probe
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (used as f64 / total as f64) * 100.0
    }
}
