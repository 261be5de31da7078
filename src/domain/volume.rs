//! Shared volume model and classification.
//!
//! The storage control plane describes every volume with a flat property
//! map. A volume is only managed here when it carries an NFS internal
//! endpoint (it is shared) and all three Kubernetes provenance properties
//! (it was provisioned through a PVC).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::endpoint::Endpoint;

/// Property holding the `host:port` of the NFS server currently exporting the volume.
pub const PROP_INTERNAL_ENDPOINT: &str = "NFS/InternalEndpoint";

/// Property holding the published, stable `host:port`.
pub const PROP_EXTERNAL_ENDPOINT: &str = "NFS/ExternalEndpoint";

/// Provenance: name of the PersistentVolume backed by this volume.
pub const PROP_PV_NAME: &str = "Aux/k8s/pv-name";

/// Provenance: name of the PersistentVolumeClaim bound to the PV.
pub const PROP_PVC_NAME: &str = "Aux/k8s/pvc-name";

/// Provenance: namespace of the PersistentVolumeClaim.
pub const PROP_PVC_NAMESPACE: &str = "Aux/k8s/pvc-namespace";

/// One network-shared volume as seen from the storage control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedVolume {
    /// Opaque, stable control-plane identifier
    pub id: String,
    /// Name of the companion objects; equals the PV name
    pub service_name: String,
    pub pvc_name: String,
    pub namespace: String,
    /// Current NFS server address, moves on failover
    pub internal_endpoint: String,
    /// Address currently published as stable, empty until first publish
    #[serde(default)]
    pub external_endpoint: String,
}

impl SharedVolume {
    /// Compare the fields that matter for change detection: service name,
    /// namespace and both endpoints. `id` and `pvc_name` are not compared.
    pub fn same_state(&self, other: &SharedVolume) -> bool {
        self.service_name == other.service_name
            && self.namespace == other.namespace
            && self.internal_endpoint == other.internal_endpoint
            && self.external_endpoint == other.external_endpoint
    }

    /// Short `namespace/service` form used in logs.
    pub fn display_name(&self) -> String {
        format!("{}/{}", self.namespace, self.service_name)
    }
}

/// Outcome of inspecting a raw control-plane record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Shared and provisioned through Kubernetes
    Shared(SharedVolume),
    /// No usable internal endpoint (not exported, or mid-failover)
    NotShared,
    /// Missing one of the provenance properties linking it to a PVC
    NotClusterProvisioned,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Shared(_) => write!(f, "shared"),
            Classification::NotShared => write!(f, "not shared"),
            Classification::NotClusterProvisioned => write!(f, "not cluster-provisioned"),
        }
    }
}

/// Classify a control-plane volume from its id and property map.
pub fn classify(id: &str, props: &BTreeMap<String, String>) -> Classification {
    let non_empty = |key: &str| props.get(key).filter(|v| !v.trim().is_empty());

    let internal_endpoint = match non_empty(PROP_INTERNAL_ENDPOINT) {
        Some(ep) if Endpoint::parse(ep).is_ok() => ep.trim().to_string(),
        _ => return Classification::NotShared,
    };

    let (Some(pv), Some(pvc), Some(namespace)) = (
        non_empty(PROP_PV_NAME),
        non_empty(PROP_PVC_NAME),
        non_empty(PROP_PVC_NAMESPACE),
    ) else {
        return Classification::NotClusterProvisioned;
    };

    Classification::Shared(SharedVolume {
        id: id.to_string(),
        service_name: pv.clone(),
        pvc_name: pvc.clone(),
        namespace: namespace.clone(),
        internal_endpoint,
        external_endpoint: props
            .get(PROP_EXTERNAL_ENDPOINT)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn props(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn full_props() -> BTreeMap<String, String> {
        props(&[
            (PROP_INTERNAL_ENDPOINT, "10.0.0.7:1234"),
            (PROP_PV_NAME, "pvc-0a1b"),
            (PROP_PVC_NAME, "data"),
            (PROP_PVC_NAMESPACE, "apps"),
        ])
    }

    #[test]
    fn test_classify_shared() {
        let volume = assert_matches!(
            classify("pvc-0a1b", &full_props()),
            Classification::Shared(v) => v
        );

        assert_eq!(volume.id, "pvc-0a1b");
        assert_eq!(volume.service_name, "pvc-0a1b");
        assert_eq!(volume.pvc_name, "data");
        assert_eq!(volume.namespace, "apps");
        assert_eq!(volume.internal_endpoint, "10.0.0.7:1234");
        assert_eq!(volume.external_endpoint, "");
    }

    #[test]
    fn test_classify_keeps_external_endpoint() {
        let mut p = full_props();
        p.insert(PROP_EXTERNAL_ENDPOINT.to_string(), "10.96.0.20:2049".to_string());

        let volume = assert_matches!(classify("v", &p), Classification::Shared(v) => v);
        assert_eq!(volume.external_endpoint, "10.96.0.20:2049");
    }

    #[test]
    fn test_classify_without_internal_endpoint() {
        let mut p = full_props();
        p.remove(PROP_INTERNAL_ENDPOINT);
        assert_eq!(classify("v", &p), Classification::NotShared);

        p.insert(PROP_INTERNAL_ENDPOINT.to_string(), "  ".to_string());
        assert_eq!(classify("v", &p), Classification::NotShared);
    }

    #[test]
    fn test_classify_invalid_internal_endpoint() {
        let mut p = full_props();
        p.insert(PROP_INTERNAL_ENDPOINT.to_string(), "10.0.0.7".to_string());
        assert_eq!(classify("v", &p), Classification::NotShared);
    }

    #[test]
    fn test_classify_missing_provenance() {
        for key in [PROP_PV_NAME, PROP_PVC_NAME, PROP_PVC_NAMESPACE] {
            let mut p = full_props();
            p.remove(key);
            assert_eq!(
                classify("v", &p),
                Classification::NotClusterProvisioned,
                "missing {}",
                key
            );
        }

        let p = props(&[(PROP_INTERNAL_ENDPOINT, "10.0.0.7:1234")]);
        assert_eq!(classify("v", &p), Classification::NotClusterProvisioned);
    }

    #[test]
    fn test_same_state_ignores_id_and_pvc() {
        let a = assert_matches!(classify("a", &full_props()), Classification::Shared(v) => v);
        let mut b = a.clone();
        b.id = "b".to_string();
        b.pvc_name = "other".to_string();
        assert!(a.same_state(&b));

        b.internal_endpoint = "10.0.0.8:1234".to_string();
        assert!(!a.same_state(&b));

        let mut c = a.clone();
        c.external_endpoint = "10.96.0.20:2049".to_string();
        assert!(!a.same_state(&c));
    }

    #[test]
    fn test_classification_display() {
        assert_eq!(Classification::NotShared.to_string(), "not shared");
        assert_eq!(
            Classification::NotClusterProvisioned.to_string(),
            "not cluster-provisioned"
        );
    }
}
