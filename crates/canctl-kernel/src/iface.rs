//! CAN interface discovery.
//!
//! Walks `/sys/class/net` looking for physical and virtual CAN interfaces,
//! falling back to parsing `ip link` output when sysfs alone is inconclusive.
//! Results are cached behind a lock and refreshed on demand so
//! `LIST_CAN_INTERFACES` always reflects the current state of the host
//! rather than whatever was present at process start.

use std::path::Path;
use std::process::Command;
use std::sync::RwLock;

/// `ARPHRD_CAN`, the `if_arp.h` hardware-type constant used by Linux for CAN
/// network devices. Read from `/sys/class/net/<iface>/type`.
const ARPHRD_CAN: u32 = 280;

/// Concurrent, refreshable view of the CAN interfaces present on this host.
#[derive(Default)]
pub struct InterfaceRegistry {
    interfaces: RwLock<Vec<String>>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self {
            interfaces: RwLock::new(Vec::new()),
        }
    }

    /// Build a registry pre-seeded with a fixed interface list, bypassing
    /// sysfs/`ip link` discovery entirely. Used by tests and fixtures that
    /// need a deterministic `is_valid` set without a real CAN stack on the
    /// host; a seeded registry still answers `LIST_CAN_INTERFACES` queries
    /// correctly as long as nothing calls `refresh`.
    pub fn seeded(interfaces: Vec<String>) -> Self {
        Self {
            interfaces: RwLock::new(interfaces),
        }
    }

    /// Re-scan the host and replace the cached interface list.
    pub fn refresh(&self) {
        let discovered = discover();
        if discovered.is_empty() {
            tracing::warn!("no CAN interfaces found on system");
        } else {
            tracing::info!(interfaces = ?discovered, "available CAN interfaces");
        }
        *self.interfaces.write().unwrap() = discovered;
    }

    /// Render the cached list for `LIST_CAN_INTERFACES`.
    pub fn render(&self) -> String {
        let interfaces = self.interfaces.read().unwrap();
        if interfaces.is_empty() {
            return "No CAN interfaces available\n".to_string();
        }
        let mut out = format!("Available CAN interfaces ({}):\n", interfaces.len());
        for iface in interfaces.iter() {
            out.push_str(&format!("  {iface}\n"));
        }
        out
    }

    /// Whether `name` was present at the last [`InterfaceRegistry::refresh`].
    pub fn is_valid(&self, name: &str) -> bool {
        self.interfaces
            .read()
            .unwrap()
            .iter()
            .any(|iface| iface == name)
    }
}

/// Scan `/sys/class/net` for CAN interfaces, falling back to `ip link` if
/// sysfs detection turns up nothing. Returns a sorted, deduplicated list.
fn discover() -> Vec<String> {
    let mut interfaces = scan_sysfs(Path::new("/sys/class/net"));

    if interfaces.is_empty() {
        interfaces = discover_via_ip_link();
    }

    interfaces.sort();
    interfaces.dedup();
    interfaces
}

fn scan_sysfs(net_path: &Path) -> Vec<String> {
    let mut interfaces = Vec::new();

    let entries = match std::fs::read_dir(net_path) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!(error = %e, "error discovering CAN interfaces");
            return interfaces;
        }
    };

    for entry in entries.flatten() {
        let iface_name = entry.file_name().to_string_lossy().into_owned();
        let iface_path = entry.path();

        let (is_can, method) = if iface_path.join("can_bittiming").exists() {
            (true, "can_bittiming")
        } else if let Some(arphrd) = read_type(&iface_path.join("type")) {
            (arphrd == ARPHRD_CAN, "type=280")
        } else if iface_name.starts_with("can") || iface_name.starts_with("vcan") {
            (check_via_ip_link(&iface_name), "ip link")
        } else {
            (false, "")
        };

        if is_can {
            let kind = if iface_name.starts_with("vcan") {
                "virtual"
            } else {
                "physical"
            };
            tracing::debug!(interface = %iface_name, kind, method, "discovered CAN interface");
            interfaces.push(iface_name);
        }
    }

    interfaces
}

fn read_type(type_path: &Path) -> Option<u32> {
    std::fs::read_to_string(type_path)
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Fallback for name-matching interfaces with no readable `type` file: ask
/// `ip link` whether it considers the interface a CAN device.
fn check_via_ip_link(iface_name: &str) -> bool {
    Command::new("ip")
        .args(["link", "show", iface_name])
        .output()
        .map(|out| {
            let text = String::from_utf8_lossy(&out.stdout);
            text.contains("can")
        })
        .unwrap_or(false)
}

/// Last-resort discovery when sysfs scanning finds nothing at all: parse
/// `ip -o link show` for any interface whose name mentions `can`/`vcan`.
fn discover_via_ip_link() -> Vec<String> {
    tracing::debug!("attempting CAN discovery via ip link command");
    let output = match Command::new("ip").args(["-o", "link", "show"]).output() {
        Ok(out) => out,
        Err(e) => {
            tracing::debug!(error = %e, "ip link fallback unavailable");
            return Vec::new();
        }
    };

    let text = String::from_utf8_lossy(&output.stdout);
    let mut interfaces = Vec::new();
    for line in text.lines() {
        // "N: <name>: <flags> ..." -- take the second colon-delimited field.
        let Some(name_field) = line.split(':').nth(1) else {
            continue;
        };
        let name = name_field.trim();
        if (name.contains("can") || name.contains("vcan")) && !interfaces.contains(&name.to_string())
        {
            tracing::debug!(interface = name, "discovered CAN interface via ip command");
            interfaces.push(name.to_string());
        }
    }
    interfaces
}
