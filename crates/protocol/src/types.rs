//! Core types shared across the protocol

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

/// Guest OS feature advertised by a disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestOsFeature {
    #[serde(rename = "type", default)]
    pub feature_type: String,
}

/// Disk attached to a compute instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    #[serde(rename = "guestOsFeatures", default)]
    pub guest_os_features: Vec<GuestOsFeature>,
}

/// Network interface of a compute instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub network: String,
    #[serde(rename = "networkIP", default)]
    pub network_ip: String,
}

/// A compute instance as listed by the companion server, plus the
/// client-side RDP fields the console maintains on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
    #[serde(default)]
    pub disks: Vec<Disk>,
    #[serde(default)]
    pub project: String,

    // Client-side state
    #[serde(default)]
    pub rdp_running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_running: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rdp_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rdp_error: Option<String>,
    #[serde(default)]
    pub display_private_rdp_dom: bool,
}

impl Instance {
    /// Network IP of the first interface, if any
    pub fn network_ip(&self) -> Option<&str> {
        self.network_interfaces
            .first()
            .map(|nic| nic.network_ip.as_str())
            .filter(|ip| !ip.is_empty())
    }

    /// True if any attached disk advertises the `WINDOWS` guest OS feature
    pub fn has_windows_disk(&self) -> bool {
        self.disks.iter().any(|disk| {
            disk.guest_os_features
                .iter()
                .any(|feature| feature.feature_type == "WINDOWS")
        })
    }
}

/// Parameter declaration in the configuration document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(default)]
    pub default: String,
    #[serde(rename = "type", default)]
    pub param_type: String,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sample: String,
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default)]
    pub dependencies: HashMap<String, String>,
}

/// Parameters in the order the configuration document declares them
pub type OrderedParams = Vec<(String, ParamSpec)>;

/// A configured admin operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OperationSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub operation: String,
    #[serde(default, deserialize_with = "ordered_params")]
    pub params: OrderedParams,
    #[serde(default)]
    pub realtime_output: bool,
}

/// A named group of operations presented as one catalog entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub operations: Vec<String>,
}

/// Pre-RDP operation entry.
///
/// UI builds send bare names; the server config carries full objects.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PreRdpEntry {
    Name(String),
    Operation {
        name: String,
        #[serde(default)]
        operation: String,
        #[serde(default)]
        dependencies: HashMap<String, String>,
    },
}

impl PreRdpEntry {
    pub fn name(&self) -> &str {
        match self {
            PreRdpEntry::Name(name) => name,
            PreRdpEntry::Operation { name, .. } => name,
        }
    }
}

/// Configuration document served by `GET /admin/get-config`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConfigDocument {
    #[serde(default, deserialize_with = "ordered_params")]
    pub common_params: OrderedParams,
    #[serde(default, deserialize_with = "null_as_default")]
    pub operations: Vec<OperationSpec>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub instance_operations: Vec<OperationSpec>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub workflows: Vec<WorkflowSpec>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub pre_rdp_operations: Vec<PreRdpEntry>,
    #[serde(default)]
    pub project_operation: Option<String>,
    #[serde(default)]
    pub validate_project_operation: Option<String>,
    #[serde(default)]
    pub enable_rdp: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ConfigDocument {
    /// The configured project operation, ignoring empty strings
    pub fn project_operation_name(&self) -> Option<&str> {
        self.project_operation
            .as_deref()
            .filter(|name| !name.trim().is_empty())
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Deserialize a JSON object of params into a Vec, keeping document order.
/// `null` yields an empty list.
fn ordered_params<'de, D>(deserializer: D) -> Result<OrderedParams, D::Error>
where
    D: Deserializer<'de>,
{
    struct OrderedVisitor(PhantomData<OrderedParams>);

    impl<'de> Visitor<'de> for OrderedVisitor {
        type Value = OrderedParams;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of parameter name to parameter spec")
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_none<E>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
        where
            D: Deserializer<'de>,
        {
            deserializer.deserialize_map(self)
        }

        fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
        where
            M: MapAccess<'de>,
        {
            let mut params = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((name, spec)) = access.next_entry::<String, Option<ParamSpec>>()? {
                params.push((name, spec.unwrap_or_default()));
            }
            Ok(params)
        }
    }

    deserializer.deserialize_option(OrderedVisitor(PhantomData))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_keeps_param_declaration_order() {
        let doc: ConfigDocument = serde_json::from_str(
            r#"{
                "common_params": {
                    "ZONE": {"default": "us-west1-b"},
                    "ACCOUNT": {"default": "ops", "optional": true},
                    "CLUSTER": {"choices": ["a", "b"]}
                },
                "operations": [{"name": "reboot", "params": {"B": {}, "A": {}}}]
            }"#,
        )
        .unwrap();

        let names: Vec<_> = doc.common_params.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["ZONE", "ACCOUNT", "CLUSTER"]);
        assert_eq!(doc.common_params[0].1.default, "us-west1-b");
        assert!(doc.common_params[1].1.optional);

        let op_params: Vec<_> = doc.operations[0].params.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(op_params, vec!["B", "A"]);
    }

    #[test]
    fn config_tolerates_nulls_and_missing_sections() {
        let doc: ConfigDocument = serde_json::from_str(
            r#"{"common_params": null, "operations": null, "pre_rdp_operations": null}"#,
        )
        .unwrap();
        assert!(doc.common_params.is_empty());
        assert!(doc.operations.is_empty());
        assert!(doc.pre_rdp_operations.is_empty());
        assert!(doc.workflows.is_empty());
    }

    #[test]
    fn pre_rdp_accepts_names_and_objects() {
        let doc: ConfigDocument = serde_json::from_str(
            r#"{"pre_rdp_operations": ["vpn", {"name": "grant", "operation": "echo ${{NAME}}"}]}"#,
        )
        .unwrap();
        let names: Vec<_> = doc.pre_rdp_operations.iter().map(PreRdpEntry::name).collect();
        assert_eq!(names, vec!["vpn", "grant"]);
    }

    #[test]
    fn instance_reads_gcloud_listing_shape() {
        let instance: Instance = serde_json::from_str(
            r#"{
                "id": "123",
                "name": "vm1",
                "status": "RUNNING",
                "zone": "projects/p/zones/z1",
                "disks": [{"guestOsFeatures": [{"type": "WINDOWS"}]}],
                "networkInterfaces": [{"name": "nic0", "network": "projects/p/global/networks/default", "networkIP": "10.0.0.2"}]
            }"#,
        )
        .unwrap();

        assert_eq!(instance.name, "vm1");
        assert_eq!(instance.network_ip(), Some("10.0.0.2"));
        assert!(instance.has_windows_disk());
        assert!(!instance.rdp_running);
        assert!(instance.port_running.is_none());
    }

    #[test]
    fn instance_without_windows_feature_is_not_windows() {
        let instance: Instance = serde_json::from_str(
            r#"{"name": "linux", "disks": [{"guestOsFeatures": [{"type": "VIRTIO_SCSI_MULTIQUEUE"}]}, {}]}"#,
        )
        .unwrap();
        assert!(!instance.has_windows_disk());
    }
}
