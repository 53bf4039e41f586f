//! INI configuration for the multi-instance server.
//!
//! ```ini
//! [instance_management]
//! base_port = 2542
//!
//! [instance_mappings]
//! # instance id = device selector (SN:, INDEX: or BUS:bus-addr)
//! 1 = SN:210249A85F3E
//! 2 = INDEX:1
//!
//! [instance_settings]
//! 1:frequency = 15000000
//! 1:latency_timer = 2
//! 2:vector_cap = 4096
//! 2:client_lock_timeout = 5
//!
//! [ip_whitelist_per_instance]
//! 1:mode = strict
//! 1:allow_1 = 10.0.0.0/24
//! 1:block_1 = 10.0.0.13
//! ```
//!
//! Unknown keys and malformed lines are logged and skipped so one typo does
//! not take the whole fleet down.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs;
use std::path::Path;

use xvc_mpsse::DeviceSelector;
use xvc_protocol::MAX_VECTOR_CAP_BYTES;
use xvc_server::WhitelistMode;

pub const DEFAULT_BASE_PORT: u16 = 2542;
/// Instances run at full speed unless told otherwise; a zero frequency means
/// "follow the client's settck requests" instead.
pub const DEFAULT_FREQUENCY_HZ: u32 = 30_000_000;
pub const DEFAULT_LATENCY_MS: u8 = 2;
pub const DEFAULT_VECTOR_CAP_BYTES: u32 = 2048;
pub const MAX_INSTANCES: u32 = 16;

#[derive(Clone, Debug)]
pub struct Settings {
    pub base_port: u16,
    pub instances: Vec<InstanceSpec>,
}

#[derive(Clone, Debug)]
pub struct InstanceSpec {
    pub id: u32,
    pub port: u16,
    pub selector: DeviceSelector,
    /// Zero lets clients steer the clock via `settck`.
    pub frequency_hz: u32,
    pub latency_ms: u8,
    pub vector_cap_bytes: u32,
    /// Zero disables the client-IP lock.
    pub client_lock_timeout_s: u32,
    pub whitelist_mode: WhitelistMode,
    /// `(entry, is_block)` pairs, validated when the instance starts.
    pub whitelist: Vec<(String, bool)>,
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: String,
        source: std::io::Error,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "cannot read config file {}: {}", path, source)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Management,
    Mappings,
    Settings,
    Whitelist,
}

/// Per-instance accumulator with the documented defaults.
struct Pending {
    selector: Option<DeviceSelector>,
    frequency_hz: u32,
    latency_ms: u8,
    vector_cap_bytes: u32,
    client_lock_timeout_s: u32,
    whitelist_mode: WhitelistMode,
    whitelist: Vec<(String, bool)>,
}

impl Default for Pending {
    fn default() -> Self {
        Pending {
            selector: None,
            frequency_hz: DEFAULT_FREQUENCY_HZ,
            latency_ms: DEFAULT_LATENCY_MS,
            vector_cap_bytes: DEFAULT_VECTOR_CAP_BYTES,
            client_lock_timeout_s: 0,
            whitelist_mode: WhitelistMode::Off,
            whitelist: Vec::new(),
        }
    }
}

pub fn load(path: &Path) -> Result<Settings, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let settings = parse(&text);
    log::info!(
        "loaded {} with {} instance(s)",
        path.display(),
        settings.instances.len()
    );
    Ok(settings)
}

fn parse(text: &str) -> Settings {
    let mut base_port = DEFAULT_BASE_PORT;
    let mut max_instances = MAX_INSTANCES;
    let mut pending: BTreeMap<u32, Pending> = BTreeMap::new();
    let mut section = Section::None;

    for (lineno, raw) in text.lines().enumerate() {
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix('[') {
            section = match rest.strip_suffix(']') {
                Some("instance_management") => Section::Management,
                Some("instance_mappings") => Section::Mappings,
                Some("instance_settings") => Section::Settings,
                Some("ip_whitelist_per_instance") => Section::Whitelist,
                Some(other) => {
                    log::warn!("config line {}: unknown section [{}]", lineno + 1, other);
                    Section::None
                }
                None => {
                    log::warn!("config line {}: malformed section header", lineno + 1);
                    Section::None
                }
            };
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            log::warn!("config line {}: missing '='", lineno + 1);
            continue;
        };
        let (key, value) = (key.trim(), value.trim());

        match section {
            Section::Management => match key {
                "base_port" => {
                    if let Ok(port) = value.parse() {
                        base_port = port;
                    }
                }
                "max_instances" => {
                    if let Ok(n) = value.parse() {
                        max_instances = n;
                    }
                }
                _ => log::warn!("config line {}: unknown key '{}'", lineno + 1, key),
            },
            Section::Mappings => {
                let Ok(id) = key.parse::<u32>() else {
                    log::warn!("config line {}: instance id '{}'", lineno + 1, key);
                    continue;
                };
                if id == 0 || id > max_instances.min(MAX_INSTANCES) {
                    log::warn!("config line {}: instance id {} out of range", lineno + 1, id);
                    continue;
                }
                match parse_selector(value) {
                    Some(selector) => {
                        pending.entry(id).or_default().selector = Some(selector);
                    }
                    None => {
                        log::warn!("config line {}: bad selector '{}'", lineno + 1, value);
                    }
                }
            }
            Section::Settings => {
                let Some((id, setting)) = split_scoped_key(key) else {
                    log::warn!("config line {}: expected 'id:setting'", lineno + 1);
                    continue;
                };
                let entry = pending.entry(id).or_default();
                match setting {
                    "frequency" => {
                        if let Ok(hz) = value.parse() {
                            entry.frequency_hz = hz;
                        }
                    }
                    "latency_timer" => {
                        if let Ok(ms) = value.parse() {
                            entry.latency_ms = ms;
                        }
                    }
                    "vector_cap" => {
                        if let Ok(cap) = value.parse::<u32>() {
                            if cap > MAX_VECTOR_CAP_BYTES {
                                log::warn!(
                                    "config line {}: vector_cap {} clamped to {}",
                                    lineno + 1,
                                    cap,
                                    MAX_VECTOR_CAP_BYTES
                                );
                            }
                            entry.vector_cap_bytes = cap.clamp(1, MAX_VECTOR_CAP_BYTES);
                        }
                    }
                    "client_lock_timeout" => {
                        if let Ok(secs) = value.parse() {
                            entry.client_lock_timeout_s = secs;
                        }
                    }
                    other => {
                        log::warn!("config line {}: unknown setting '{}'", lineno + 1, other);
                    }
                }
            }
            Section::Whitelist => {
                let Some((id, setting)) = split_scoped_key(key) else {
                    log::warn!("config line {}: expected 'id:setting'", lineno + 1);
                    continue;
                };
                let entry = pending.entry(id).or_default();
                if setting == "mode" {
                    entry.whitelist_mode = match value {
                        "strict" => WhitelistMode::Strict,
                        "permissive" => WhitelistMode::Permissive,
                        _ => WhitelistMode::Off,
                    };
                } else if setting.starts_with("allow_") {
                    entry.whitelist.push((value.to_string(), false));
                } else if setting.starts_with("block_") {
                    entry.whitelist.push((value.to_string(), true));
                } else {
                    log::warn!("config line {}: unknown whitelist key '{}'", lineno + 1, key);
                }
            }
            Section::None => {
                log::warn!("config line {}: key outside any section", lineno + 1);
            }
        }
    }

    let instances = pending
        .into_iter()
        .filter_map(|(id, p)| {
            let selector = p.selector?;
            Some(InstanceSpec {
                id,
                port: base_port.saturating_add(id as u16 - 1),
                selector,
                frequency_hz: p.frequency_hz,
                latency_ms: p.latency_ms,
                vector_cap_bytes: p.vector_cap_bytes,
                client_lock_timeout_s: p.client_lock_timeout_s,
                whitelist_mode: p.whitelist_mode,
                whitelist: p.whitelist,
            })
        })
        .collect();

    Settings {
        base_port,
        instances,
    }
}

fn strip_comment(line: &str) -> &str {
    let end = line
        .find(|c| c == '#' || c == ';')
        .unwrap_or(line.len());
    &line[..end]
}

/// Splits the `<id>:<setting>` form used outside the mappings section.
fn split_scoped_key(key: &str) -> Option<(u32, &str)> {
    let (id, setting) = key.split_once(':')?;
    let id = id.trim().parse().ok()?;
    if id == 0 || id > MAX_INSTANCES {
        return None;
    }
    Some((id, setting.trim()))
}

pub fn parse_selector(text: &str) -> Option<DeviceSelector> {
    if let Some(serial) = text.strip_prefix("SN:") {
        let serial = serial.trim();
        (!serial.is_empty()).then(|| DeviceSelector::Serial(serial.to_string()))
    } else if let Some(index) = text.strip_prefix("INDEX:") {
        index.trim().parse().ok().map(DeviceSelector::Index)
    } else if let Some(location) = text.strip_prefix("BUS:") {
        let (bus, addr) = location.split_once('-')?;
        Some(DeviceSelector::Location {
            bus: bus.trim().parse().ok()?,
            addr: addr.trim().parse().ok()?,
        })
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const SAMPLE: &str = r#"
# fleet of two HS2 dongles
[instance_management]
base_port = 3000
max_instances = 8

[instance_mappings]
1 = SN:210249A85F3E   ; lab bench A
2 = INDEX:1
9 = BUS:1-4

[instance_settings]
1:frequency = 15000000
1:client_lock_timeout = 5
2:vector_cap = 4096
2:latency_timer = 4
2:frequency = 0

[ip_whitelist_per_instance]
1:mode = strict
1:allow_1 = 10.0.0.0/24
1:block_1 = 10.0.0.13
"#;

    #[test]
    fn parses_the_sample() {
        let settings = parse(SAMPLE);
        assert_eq!(settings.base_port, 3000);
        assert_eq!(settings.instances.len(), 2);

        let one = &settings.instances[0];
        assert_eq!(one.id, 1);
        assert_eq!(one.port, 3000);
        assert_eq!(
            one.selector,
            DeviceSelector::Serial("210249A85F3E".to_string())
        );
        assert_eq!(one.frequency_hz, 15_000_000);
        assert_eq!(one.client_lock_timeout_s, 5);
        assert_eq!(one.whitelist_mode, WhitelistMode::Strict);
        assert_eq!(
            one.whitelist,
            vec![
                ("10.0.0.0/24".to_string(), false),
                ("10.0.0.13".to_string(), true)
            ]
        );

        let two = &settings.instances[1];
        assert_eq!(two.id, 2);
        assert_eq!(two.port, 3001);
        assert_eq!(two.selector, DeviceSelector::Index(1));
        assert_eq!(two.frequency_hz, 0);
        assert_eq!(two.vector_cap_bytes, 4096);
        assert_eq!(two.latency_ms, 4);
        assert_eq!(two.whitelist_mode, WhitelistMode::Off);
    }

    #[test]
    fn out_of_range_id_is_dropped() {
        // Instance 9 exceeds max_instances = 8 in the sample.
        let settings = parse(SAMPLE);
        assert!(settings.instances.iter().all(|i| i.id != 9));
    }

    #[test]
    fn settings_without_mapping_enable_nothing() {
        let settings = parse("[instance_settings]\n3:frequency = 100\n");
        assert!(settings.instances.is_empty());
    }

    #[test]
    fn vector_cap_clamps() {
        let text = "[instance_mappings]\n1 = INDEX:0\n[instance_settings]\n1:vector_cap = 9999999\n";
        let settings = parse(text);
        assert_eq!(settings.instances[0].vector_cap_bytes, MAX_VECTOR_CAP_BYTES);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let text = "[instance_mappings]\nnot a line\n1 = WHAT:ever\n2 = INDEX:0\n";
        let settings = parse(text);
        assert_eq!(settings.instances.len(), 1);
        assert_eq!(settings.instances[0].id, 2);
    }

    #[test]
    fn selector_forms() {
        assert_eq!(
            parse_selector("SN:ABC123"),
            Some(DeviceSelector::Serial("ABC123".to_string()))
        );
        assert_eq!(parse_selector("INDEX:3"), Some(DeviceSelector::Index(3)));
        assert_eq!(
            parse_selector("BUS:1-12"),
            Some(DeviceSelector::Location { bus: 1, addr: 12 })
        );
        assert_eq!(parse_selector("auto"), None);
        assert_eq!(parse_selector("SN:"), None);
    }
}
