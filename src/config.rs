//! Monitor configuration
//!
//! Lists the devices to manage and the nodes to try for each of them. Ids
//! may be written as hex strings (`"0x046d"`) or plain integers.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::connection::{ConnectionType, SubDeviceCandidate};
use crate::identity::DeviceId;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Accept `0x046d`, `046d`-style hex strings, or integers
fn deserialize_id<'de, D: Deserializer<'de>>(d: D) -> Result<u16, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdRepr {
        Number(u16),
        Text(String),
    }

    match IdRepr::deserialize(d)? {
        IdRepr::Number(n) => Ok(n),
        IdRepr::Text(s) => {
            let digits = s
                .trim()
                .trim_start_matches("0x")
                .trim_start_matches("0X");
            u16::from_str_radix(digits, 16)
                .map_err(|_| serde::de::Error::custom(format!("invalid device id: \"{s}\"")))
        }
    }
}

/// One node to try for a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubDeviceEntry {
    pub path: String,
    pub kind: ConnectionType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    #[serde(default)]
    pub name: String,
    #[serde(deserialize_with = "deserialize_id")]
    pub vendor_id: u16,
    #[serde(deserialize_with = "deserialize_id")]
    pub product_id: u16,
    #[serde(default)]
    pub sub_devices: Vec<SubDeviceEntry>,
}

impl DeviceEntry {
    pub fn device_id(&self) -> DeviceId {
        DeviceId::new(self.vendor_id, self.product_id)
    }

    pub fn candidates(&self) -> Vec<SubDeviceCandidate> {
        self.sub_devices
            .iter()
            .map(|sd| SubDeviceCandidate {
                device_file: sd.path.clone(),
                kind: sd.kind,
                phys: String::new(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Grab event nodes and re-emit their input through uinput
    #[serde(default)]
    pub virtual_device: bool,
    #[serde(default = "default_virtual_device_name")]
    pub virtual_device_name: String,
    /// Reactor wait per loop iteration
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

fn default_virtual_device_name() -> String {
    "hidconn virtual input".to_string()
}

fn default_poll_interval() -> u64 {
    100
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            virtual_device: false,
            virtual_device_name: default_virtual_device_name(),
            poll_interval_ms: default_poll_interval(),
            devices: Vec::new(),
        }
    }
}

impl MonitorConfig {
    /// `~/.config/hidconn/monitor.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hidconn")
            .join("monitor.toml")
    }

    /// Load config from a file, or return default if not found
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Device entry for `id`, created if missing
    pub fn device_mut(&mut self, id: DeviceId) -> &mut DeviceEntry {
        let pos = self.devices.iter().position(|d| d.device_id() == id);
        let pos = match pos {
            Some(pos) => pos,
            None => {
                self.devices.push(DeviceEntry {
                    name: id.to_string(),
                    vendor_id: id.vendor_id(),
                    product_id: id.product_id(),
                    sub_devices: Vec::new(),
                });
                self.devices.len() - 1
            }
        };
        &mut self.devices[pos]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_empty() {
        let config = MonitorConfig::parse("").unwrap();
        assert!(!config.virtual_device);
        assert_eq!(config.poll_interval_ms, 100);
        assert!(config.devices.is_empty());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = MonitorConfig::load(Path::new("/nonexistent/hidconn/monitor.toml")).unwrap();
        assert_eq!(config.virtual_device_name, "hidconn virtual input");
    }

    #[test]
    fn test_parse_devices() {
        let toml = r#"
virtual_device = true
poll_interval_ms = 250

[[devices]]
name = "Spotlight"
vendor_id = "0x046d"
product_id = "c53e"

[[devices.sub_devices]]
path = "/dev/input/event12"
kind = "event"

[[devices.sub_devices]]
path = "/dev/hidraw3"
kind = "hidraw"

[[devices]]
vendor_id = 1133
product_id = 45827
"#;
        let config = MonitorConfig::parse(toml).unwrap();
        assert!(config.virtual_device);
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.devices.len(), 2);

        let spotlight = &config.devices[0];
        assert_eq!(spotlight.device_id(), DeviceId::new(0x046d, 0xc53e));
        let candidates = spotlight.candidates();
        assert_eq!(candidates[0], SubDeviceCandidate::event("/dev/input/event12"));
        assert_eq!(candidates[1], SubDeviceCandidate::hidraw("/dev/hidraw3"));

        assert_eq!(config.devices[1].device_id(), DeviceId::new(0x046d, 0xb303));
        assert!(config.devices[1].sub_devices.is_empty());
    }

    #[test]
    fn test_invalid_id_rejected() {
        let toml = r#"
[[devices]]
vendor_id = "logitech"
product_id = 1
"#;
        assert!(MonitorConfig::parse(toml).is_err());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let toml = r#"
[[devices]]
vendor_id = 1
product_id = 2
sub_devices = [{ path = "/dev/usb/hiddev0", kind = "hiddev" }]
"#;
        assert!(MonitorConfig::parse(toml).is_err());
    }

    #[test]
    fn test_device_mut_creates_once() {
        let mut config = MonitorConfig::default();
        let id = DeviceId::new(0x046d, 0xc53e);
        config.device_mut(id).sub_devices.push(SubDeviceEntry {
            path: "/dev/hidraw0".into(),
            kind: ConnectionType::Hidraw,
        });
        config.device_mut(id);
        assert_eq!(config.devices.len(), 1);
        assert_eq!(config.devices[0].sub_devices.len(), 1);
    }
}
