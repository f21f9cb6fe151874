//! Static catalog of built-in metric keys.
//!
//! Each entry pairs a platform item key with a pure extractor over a
//! [`SystemSnapshot`]. The set is chosen once at construction for the host
//! OS (disk keys are parameterized by the root mount, load averages exist
//! only on POSIX); extractors never branch on the platform.

use std::collections::HashMap;

use vigil_common::types::MetricValue;

use crate::snapshot::SystemSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCategory {
    Cpu,
    Memory,
    Disk,
    Network,
    Host,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Numeric,
    Text,
}

type Extractor = fn(&SystemSnapshot) -> MetricValue;

/// One catalog entry. `interval_secs` is the advisory default cadence for the
/// key when the platform does not override it.
pub struct BuiltinKey {
    pub key: String,
    pub name: &'static str,
    pub category: KeyCategory,
    pub value_type: ValueType,
    pub units: &'static str,
    pub interval_secs: u32,
    extract: Extractor,
}

impl BuiltinKey {
    pub fn extract(&self, snapshot: &SystemSnapshot) -> MetricValue {
        (self.extract)(snapshot)
    }
}

/// Read-only after construction; lookup is O(1) by key.
pub struct BuiltinKeyRegistry {
    keys: HashMap<String, BuiltinKey>,
}

impl BuiltinKeyRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            keys: HashMap::new(),
        };
        registry.add_cpu_keys();
        registry.add_memory_keys();
        registry.add_disk_keys();
        registry.add_network_keys();
        registry.add_host_keys();
        registry
    }

    pub fn get(&self, key: &str) -> Option<&BuiltinKey> {
        self.keys.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BuiltinKey> {
        self.keys.values()
    }

    /// Evaluate the extractor for `key` against `snapshot`.
    pub fn extract(&self, key: &str, snapshot: &SystemSnapshot) -> Option<MetricValue> {
        self.keys.get(key).map(|k| k.extract(snapshot))
    }

    fn add(
        &mut self,
        key: impl Into<String>,
        name: &'static str,
        category: KeyCategory,
        value_type: ValueType,
        units: &'static str,
        interval_secs: u32,
        extract: Extractor,
    ) {
        let key = key.into();
        self.keys.insert(
            key.clone(),
            BuiltinKey {
                key,
                name,
                category,
                value_type,
                units,
                interval_secs,
                extract,
            },
        );
    }

    fn add_cpu_keys(&mut self) {
        use KeyCategory::Cpu;
        use ValueType::Numeric;

        self.add("system.cpu.util", "CPU utilization", Cpu, Numeric, "%", 30, |s| {
            MetricValue::Float(s.cpu.usage_percent)
        });
        self.add("system.cpu.num", "CPU core count", Cpu, Numeric, "", 300, |s| {
            MetricValue::Int(s.cpu.count as i64)
        });

        if !cfg!(windows) {
            self.add("system.cpu.load1", "1-minute load", Cpu, Numeric, "", 60, |s| {
                MetricValue::Float(s.cpu.load_avg.map(|l| l[0]).unwrap_or(0.0))
            });
            self.add("system.cpu.load5", "5-minute load", Cpu, Numeric, "", 60, |s| {
                MetricValue::Float(s.cpu.load_avg.map(|l| l[1]).unwrap_or(0.0))
            });
            self.add("system.cpu.load15", "15-minute load", Cpu, Numeric, "", 60, |s| {
                MetricValue::Float(s.cpu.load_avg.map(|l| l[2]).unwrap_or(0.0))
            });
        }
    }

    fn add_memory_keys(&mut self) {
        use KeyCategory::Memory;
        use ValueType::Numeric;

        self.add("vm.memory.size[total]", "Memory total", Memory, Numeric, "B", 30, |s| {
            MetricValue::from(s.memory.total)
        });
        self.add("vm.memory.size[used]", "Memory used", Memory, Numeric, "B", 30, |s| {
            MetricValue::from(s.memory.used)
        });
        self.add("vm.memory.size[free]", "Memory free", Memory, Numeric, "B", 30, |s| {
            MetricValue::from(s.memory.free)
        });
        self.add("vm.memory.util", "Memory utilization", Memory, Numeric, "%", 30, |s| {
            MetricValue::Float(s.memory.usage_percent)
        });
    }

    fn add_disk_keys(&mut self) {
        use KeyCategory::Disk;
        use ValueType::Numeric;

        let mount = if cfg!(windows) { "C:" } else { "/" };

        self.add(
            format!("vfs.fs.size[{mount},total]"),
            "Disk space total",
            Disk,
            Numeric,
            "B",
            60,
            |s| MetricValue::from(s.disk.total),
        );
        self.add(
            format!("vfs.fs.size[{mount},used]"),
            "Disk space used",
            Disk,
            Numeric,
            "B",
            60,
            |s| MetricValue::from(s.disk.used),
        );
        self.add(
            format!("vfs.fs.size[{mount},free]"),
            "Disk space free",
            Disk,
            Numeric,
            "B",
            60,
            |s| MetricValue::from(s.disk.free),
        );
        self.add(
            format!("vfs.fs.pused[{mount}]"),
            "Disk space utilization",
            Disk,
            Numeric,
            "%",
            60,
            |s| MetricValue::Float(s.disk.usage_percent),
        );

        self.add("vfs.dev.read[,bytes]", "Disk bytes read", Disk, Numeric, "B", 30, |s| {
            MetricValue::from(s.disk.io.read_bytes)
        });
        self.add("vfs.dev.write[,bytes]", "Disk bytes written", Disk, Numeric, "B", 30, |s| {
            MetricValue::from(s.disk.io.write_bytes)
        });
        self.add("vfs.dev.read[,ops]", "Disk read operations", Disk, Numeric, "", 30, |s| {
            MetricValue::from(s.disk.io.read_ops)
        });
        self.add("vfs.dev.write[,ops]", "Disk write operations", Disk, Numeric, "", 30, |s| {
            MetricValue::from(s.disk.io.write_ops)
        });
    }

    fn add_network_keys(&mut self) {
        use KeyCategory::Network;
        use ValueType::Numeric;

        self.add("net.if.in[,bytes]", "Network bytes received", Network, Numeric, "B", 30, |s| {
            MetricValue::from(s.network.bytes_recv)
        });
        self.add("net.if.out[,bytes]", "Network bytes sent", Network, Numeric, "B", 30, |s| {
            MetricValue::from(s.network.bytes_sent)
        });
        self.add("net.if.in[,packets]", "Network packets received", Network, Numeric, "", 30, |s| {
            MetricValue::from(s.network.packets_recv)
        });
        self.add("net.if.out[,packets]", "Network packets sent", Network, Numeric, "", 30, |s| {
            MetricValue::from(s.network.packets_sent)
        });
    }

    fn add_host_keys(&mut self) {
        use KeyCategory::Host;
        use ValueType::{Numeric, Text};

        self.add("system.hostname", "Hostname", Host, Text, "", 300, |s| {
            MetricValue::Text(s.host.hostname.clone())
        });
        self.add("system.uname", "Operating system", Host, Text, "", 300, |s| {
            MetricValue::Text(s.host.os.clone())
        });
        self.add("system.platform", "Platform", Host, Text, "", 300, |s| {
            MetricValue::Text(s.host.platform.clone())
        });
        self.add("system.uptime", "Uptime", Host, Numeric, "s", 60, |s| {
            MetricValue::from(s.host.uptime_secs)
        });
    }
}

impl Default for BuiltinKeyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
