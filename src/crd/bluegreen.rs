//! BlueGreenDeployment Custom Resource Definition
//!
//! A BlueGreenDeployment describes the desired workload: how many replicas
//! to run and the pod spec they should run. The controller materializes it
//! as two ReplicaSets (blue and green) and a Service that routes traffic to
//! exactly one of them.

use std::fmt;

use k8s_openapi::api::core::v1::PodSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The two workload set identities
///
/// Exactly one color is "active" (receiving traffic) at any time; the other
/// is idle at zero replicas until the next cutover needs it.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    /// The blue workload set
    Blue,
    /// The green workload set
    Green,
}

impl Color {
    /// The other color
    pub fn other(self) -> Self {
        match self {
            Color::Blue => Color::Green,
            Color::Green => Color::Blue,
        }
    }

    /// Well-known ReplicaSet name for this color
    pub fn replica_set_name(self) -> &'static str {
        match self {
            Color::Blue => crate::BLUE_RS_NAME,
            Color::Green => crate::GREEN_RS_NAME,
        }
    }

    /// The label value used in selectors for this color
    pub fn as_str(self) -> &'static str {
        match self {
            Color::Blue => "blue",
            Color::Green => "green",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Specification for a BlueGreenDeployment
///
/// The pod spec is treated as an opaque template: the controller copies it
/// verbatim into the active ReplicaSet and only ever compares it by
/// fingerprint. No validation is performed on its contents; a malformed pod
/// spec produces an unready ReplicaSet, which the controller tolerates.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "bluegreen.dev",
    version = "v1alpha1",
    kind = "BlueGreenDeployment",
    plural = "bluegreendeployments",
    shortname = "bgd",
    status = "BlueGreenDeploymentStatus",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"Active","type":"string","jsonPath":".status.activeReplicaSetColor"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BlueGreenDeploymentSpec {
    /// Number of replicas the active ReplicaSet should run
    #[serde(default)]
    pub replicas: i32,

    /// Pod template for the workload
    #[serde(default)]
    pub pod_spec: PodSpec,
}

/// Status for a BlueGreenDeployment
///
/// `active_replica_set_color` is owned exclusively by the controller. It is
/// empty only before the first reconciliation; once set it is always one of
/// the two colors, and it is rewritten immediately before a cutover begins
/// so that a crash mid-cutover resumes on the correct branch.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlueGreenDeploymentStatus {
    /// Color of the ReplicaSet currently recorded as active
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_replica_set_color: Option<Color>,
}

impl BlueGreenDeployment {
    /// The color currently recorded as active, defaulting to blue
    ///
    /// Blue is the bootstrap choice for a newly observed deployment; the
    /// first sync persists it before any cutover logic runs.
    pub fn active_color(&self) -> Color {
        self.status
            .as_ref()
            .and_then(|s| s.active_replica_set_color)
            .unwrap_or(Color::Blue)
    }

    /// True if the active color has never been recorded
    pub fn active_color_unset(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.active_replica_set_color)
            .is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Color Identity Stories
    // =========================================================================

    /// Story: The two colors are each other's complement
    ///
    /// Cutover logic constantly flips between active and inactive; `other`
    /// must be a strict involution or traffic could be routed to the wrong
    /// ReplicaSet.
    #[test]
    fn story_colors_are_complementary() {
        assert_eq!(Color::Blue.other(), Color::Green);
        assert_eq!(Color::Green.other(), Color::Blue);
        assert_eq!(Color::Blue.other().other(), Color::Blue);
    }

    /// Story: Each color maps to a fixed ReplicaSet name and label value
    ///
    /// The names are singletons per namespace; selectors and gets rely on
    /// them being stable across reconciliations.
    #[test]
    fn story_colors_map_to_well_known_names() {
        assert_eq!(Color::Blue.replica_set_name(), "blue-rs");
        assert_eq!(Color::Green.replica_set_name(), "green-rs");
        assert_eq!(Color::Blue.as_str(), "blue");
        assert_eq!(Color::Green.to_string(), "green");
    }

    /// Story: Colors serialize as the lowercase literals used in labels
    ///
    /// The status field and the Service selector share these literals, so
    /// serialization must match the label values exactly.
    #[test]
    fn story_colors_serialize_as_label_literals() {
        assert_eq!(serde_json::to_string(&Color::Blue).unwrap(), "\"blue\"");
        assert_eq!(
            serde_json::from_str::<Color>("\"green\"").unwrap(),
            Color::Green
        );
    }

    // =========================================================================
    // Active Color Lifecycle Stories
    // =========================================================================

    /// Story: A newly observed deployment defaults to blue
    ///
    /// Before the first sync no status exists; the controller treats the
    /// deployment as blue-active and persists that choice.
    #[test]
    fn story_unset_status_defaults_to_blue() {
        let bgd = BlueGreenDeployment::new("demo", BlueGreenDeploymentSpec::default());
        assert!(bgd.active_color_unset());
        assert_eq!(bgd.active_color(), Color::Blue);
    }

    /// Story: Whole deployments compare by value
    ///
    /// The optimistic updaters skip the write when a mutation leaves the
    /// fetched deployment unchanged, which requires equality over the full
    /// resource (metadata, spec, and status alike).
    #[test]
    fn story_deployments_compare_by_value() {
        let mut a = BlueGreenDeployment::new("demo", BlueGreenDeploymentSpec::default());
        a.status = Some(BlueGreenDeploymentStatus {
            active_replica_set_color: Some(Color::Blue),
        });
        let b = a.clone();
        assert_eq!(a, b);

        let mut c = b.clone();
        c.status = Some(BlueGreenDeploymentStatus {
            active_replica_set_color: Some(Color::Green),
        });
        assert_ne!(a, c);
    }

    /// Story: A recorded active color is authoritative
    #[test]
    fn story_recorded_color_wins_over_default() {
        let mut bgd = BlueGreenDeployment::new("demo", BlueGreenDeploymentSpec::default());
        bgd.status = Some(BlueGreenDeploymentStatus {
            active_replica_set_color: Some(Color::Green),
        });
        assert!(!bgd.active_color_unset());
        assert_eq!(bgd.active_color(), Color::Green);
    }

    // =========================================================================
    // Manifest Stories
    // =========================================================================

    /// Story: User defines a deployment in a YAML manifest
    ///
    /// The spec shape users write must deserialize with camelCase keys and
    /// an ordinary core/v1 pod spec inside.
    #[test]
    fn story_yaml_manifest_defines_deployment() {
        let yaml = r#"
replicas: 3
podSpec:
  containers:
    - name: web
      image: nginx:1.25
"#;
        let spec: BlueGreenDeploymentSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.replicas, 3);
        assert_eq!(spec.pod_spec.containers.len(), 1);
        assert_eq!(spec.pod_spec.containers[0].name, "web");
        assert_eq!(spec.pod_spec.containers[0].image.as_deref(), Some("nginx:1.25"));
    }

    /// Story: Status field serializes under its wire name
    ///
    /// External tooling reads `.status.activeReplicaSetColor`; renaming it
    /// would silently break printcolumns and observers.
    #[test]
    fn story_status_uses_wire_field_name() {
        let status = BlueGreenDeploymentStatus {
            active_replica_set_color: Some(Color::Blue),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["activeReplicaSetColor"], "blue");
    }
}
