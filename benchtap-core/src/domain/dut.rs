//! Device-under-test domain types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// How commands reach a DUT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Run through the local host shell
    Local,
    /// Run over a remote shell (ssh)
    #[serde(alias = "ssh")]
    Remote,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Local => "local",
            TransportKind::Remote => "remote",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Description of a device under test
///
/// Owns no resources. A transport is created fresh from it for each use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DutDescriptor {
    pub host: String,
    pub transport: TransportKind,
    pub user: Option<String>,
    /// Replaces the default remote shell options when set
    pub ssh_options: Option<Vec<String>>,
    /// Free-form metadata (e.g. `iperf_ip` address override)
    #[serde(default)]
    pub meta: BTreeMap<String, Value>,
}

impl DutDescriptor {
    /// The local host
    pub fn local() -> Self {
        Self::new("localhost", TransportKind::Local)
    }

    /// A host reached over the remote shell
    pub fn remote(host: impl Into<String>) -> Self {
        Self::new(host, TransportKind::Remote)
    }

    pub fn new(host: impl Into<String>, transport: TransportKind) -> Self {
        Self {
            host: host.into(),
            transport,
            user: None,
            ssh_options: None,
            meta: BTreeMap::new(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_ssh_options(mut self, options: Vec<String>) -> Self {
        self.ssh_options = Some(options);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Address a throughput sender should dial to reach this DUT
    ///
    /// Prefers the `iperf_ip` metadata, then `ip`, then the host name.
    pub fn throughput_address(&self) -> String {
        ["iperf_ip", "ip"]
            .iter()
            .filter_map(|key| self.meta.get(*key))
            .find_map(|value| match value {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Null | Value::String(_) => None,
                other => Some(other.to_string()),
            })
            .unwrap_or_else(|| self.host.clone())
    }

    /// Snapshot recorded in run results: host, transport and metadata
    pub fn snapshot(&self) -> Map<String, Value> {
        let mut snapshot = Map::new();
        snapshot.insert("host".to_string(), Value::String(self.host.clone()));
        snapshot.insert(
            "transport".to_string(),
            Value::String(self.transport.to_string()),
        );
        for (key, value) in &self.meta {
            snapshot.insert(key.clone(), value.clone());
        }
        snapshot
    }
}

impl Default for DutDescriptor {
    fn default() -> Self {
        Self::local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput_address_precedence() {
        let dut = DutDescriptor::remote("dut-a");
        assert_eq!(dut.throughput_address(), "dut-a");

        let dut = dut.with_meta("ip", "10.0.0.2");
        assert_eq!(dut.throughput_address(), "10.0.0.2");

        let dut = dut.with_meta("iperf_ip", "192.168.1.7");
        assert_eq!(dut.throughput_address(), "192.168.1.7");
    }

    #[test]
    fn test_snapshot_includes_meta() {
        let dut = DutDescriptor::remote("rack3")
            .with_user("root")
            .with_meta("slot", 4);
        let snapshot = dut.snapshot();
        assert_eq!(snapshot["host"], "rack3");
        assert_eq!(snapshot["transport"], "remote");
        assert_eq!(snapshot["slot"], 4);
        assert!(!snapshot.contains_key("user"));
    }

    #[test]
    fn test_transport_kind_accepts_ssh_alias() {
        let kind: TransportKind = serde_json::from_str("\"ssh\"").unwrap();
        assert_eq!(kind, TransportKind::Remote);
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"remote\"");
    }
}
