//! GPU enumeration.
//!
//! The registry is built once at startup from
//! `nvidia-smi --query-gpu=index,name,uuid --format=csv,noheader` and never
//! changes afterwards. Indices are only meaningful for the current driver
//! session; the UUID is the stable key used in every topic.

use std::collections::{BTreeMap, HashSet};
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;

use gpusight_common::validate_segment;

/// Errors building the device registry. All of them are fatal.
#[derive(Debug, Error)]
pub enum EnumerationError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("malformed device line {line_no}: '{line}' ({reason})")]
    Malformed {
        line_no: usize,
        line: String,
        reason: String,
    },

    #[error("duplicate device identifier '{0}'")]
    DuplicateIdentifier(String),

    #[error("duplicate device index {0}")]
    DuplicateIndex(u32),

    #[error("no GPUs found")]
    NoDevices,
}

/// A GPU as reported by the enumeration query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Session-local index, as used in the `gpu` column of `dmon`.
    pub index: u32,
    /// Product name, e.g. "NVIDIA GeForce RTX 4090".
    pub name: String,
    /// Stable identifier (the GPU UUID).
    pub identifier: String,
}

/// Read-only index → device mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceRegistry {
    devices: BTreeMap<u32, Device>,
}

impl DeviceRegistry {
    /// Build a registry, rejecting an empty set or repeated indices/identifiers.
    pub fn new(devices: impl IntoIterator<Item = Device>) -> Result<Self, EnumerationError> {
        let mut by_index = BTreeMap::new();
        let mut identifiers = HashSet::new();

        for device in devices {
            if !identifiers.insert(device.identifier.clone()) {
                return Err(EnumerationError::DuplicateIdentifier(device.identifier));
            }
            let index = device.index;
            if by_index.insert(index, device).is_some() {
                return Err(EnumerationError::DuplicateIndex(index));
            }
        }

        if by_index.is_empty() {
            return Err(EnumerationError::NoDevices);
        }

        Ok(Self { devices: by_index })
    }

    /// Look a device up by its session index.
    pub fn get(&self, index: u32) -> Option<&Device> {
        self.devices.get(&index)
    }

    /// Devices in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Parse the CSV output of the enumeration query.
///
/// Blank lines are ignored. Any other line must have exactly three fields
/// with an integer index; one bad line fails the whole enumeration.
pub fn parse_devices(output: &str) -> Result<DeviceRegistry, EnumerationError> {
    let mut devices = Vec::new();

    for (i, line) in output.lines().enumerate() {
        let line_no = i + 1;
        if line.trim().is_empty() {
            continue;
        }

        let malformed = |reason: String| EnumerationError::Malformed {
            line_no,
            line: line.to_string(),
            reason,
        };

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let [index, name, identifier] = fields.as_slice() else {
            return Err(malformed(format!("expected 3 fields, got {}", fields.len())));
        };

        let index = index
            .parse::<u32>()
            .map_err(|e| malformed(format!("invalid index '{}': {}", index, e)))?;
        if name.is_empty() {
            return Err(malformed("empty name".to_string()));
        }
        validate_segment(identifier).map_err(|e| malformed(e.to_string()))?;

        devices.push(Device {
            index,
            name: name.to_string(),
            identifier: identifier.to_string(),
        });
    }

    DeviceRegistry::new(devices)
}

/// Run the enumeration query and parse its output.
pub async fn enumerate(
    command: &str,
    args: &[String],
) -> Result<DeviceRegistry, EnumerationError> {
    tracing::debug!(command, ?args, "Enumerating GPUs");

    let output = Command::new(command)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|source| EnumerationError::Spawn {
            command: command.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(EnumerationError::CommandFailed {
            command: command.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let registry = parse_devices(&String::from_utf8_lossy(&output.stdout))?;

    for device in registry.iter() {
        tracing::info!(
            index = device.index,
            name = %device.name,
            identifier = %device.identifier,
            "Found GPU"
        );
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_GPUS: &str = "\
0, NVIDIA GeForce RTX 4090, GPU-5b2f1c3e-7d4a-11ee-b962-0242ac120002
1, NVIDIA RTX A4000, GPU-8c1d2e3f-7d4a-11ee-b962-0242ac120003
";

    #[test]
    fn test_parse_two_devices() {
        let registry = parse_devices(TWO_GPUS).unwrap();

        assert_eq!(registry.len(), 2);
        let gpu0 = registry.get(0).unwrap();
        assert_eq!(gpu0.name, "NVIDIA GeForce RTX 4090");
        assert_eq!(gpu0.identifier, "GPU-5b2f1c3e-7d4a-11ee-b962-0242ac120002");
        assert_eq!(registry.get(1).unwrap().name, "NVIDIA RTX A4000");
        assert!(registry.get(2).is_none());
    }

    #[test]
    fn test_parse_skips_blank_lines() {
        let registry = parse_devices("\n0, GPU0, abc-123\n\n").unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(matches!(parse_devices(""), Err(EnumerationError::NoDevices)));
        assert!(matches!(parse_devices("\n  \n"), Err(EnumerationError::NoDevices)));
    }

    #[test]
    fn test_malformed_line_fails_whole_enumeration() {
        let output = "0, GPU0, abc-123\n1, GPU1\n";
        let err = parse_devices(output).unwrap_err();
        assert!(matches!(err, EnumerationError::Malformed { line_no: 2, .. }));
    }

    #[test]
    fn test_name_with_comma_is_malformed() {
        let err = parse_devices("0, Weird, Name, abc-123").unwrap_err();
        assert!(matches!(err, EnumerationError::Malformed { .. }));
    }

    #[test]
    fn test_bad_index() {
        let err = parse_devices("zero, GPU0, abc-123").unwrap_err();
        assert!(matches!(err, EnumerationError::Malformed { line_no: 1, .. }));
    }

    #[test]
    fn test_identifier_with_wildcard_rejected() {
        assert!(parse_devices("0, GPU0, abc/#").is_err());
    }

    #[test]
    fn test_duplicate_identifier() {
        let err = parse_devices("0, A, same\n1, B, same").unwrap_err();
        assert!(matches!(err, EnumerationError::DuplicateIdentifier(id) if id == "same"));
    }

    #[test]
    fn test_duplicate_index() {
        let err = parse_devices("0, A, id-a\n0, B, id-b").unwrap_err();
        assert!(matches!(err, EnumerationError::DuplicateIndex(0)));
    }

    #[test]
    fn test_iter_in_index_order() {
        let registry = parse_devices("1, B, id-b\n0, A, id-a").unwrap();
        let names: Vec<_> = registry.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_enumerate_runs_command() {
        let registry = enumerate(
            "sh",
            &["-c".to_string(), "echo '0, GPU0, abc-123'".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(registry.get(0).unwrap().identifier, "abc-123");
    }

    #[tokio::test]
    async fn test_enumerate_command_failure() {
        let err = enumerate("sh", &["-c".to_string(), "echo boom >&2; exit 9".to_string()])
            .await
            .unwrap_err();
        match err {
            EnumerationError::CommandFailed { stderr, .. } => assert_eq!(stderr, "boom"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_enumerate_missing_binary() {
        let err = enumerate("/nonexistent/nvidia-smi", &[]).await.unwrap_err();
        assert!(matches!(err, EnumerationError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_enumerate_no_output() {
        let err = enumerate("sh", &["-c".to_string(), "true".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, EnumerationError::NoDevices));
    }
}
