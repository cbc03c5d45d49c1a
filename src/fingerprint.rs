//! Pod spec change detection
//!
//! Cutover decisions compare the desired pod spec against the live templates
//! of both ReplicaSets. Rather than relying on deep structural equality, the
//! specs are serialized to canonical JSON and hashed: two specs with
//! different fingerprints are guaranteed unequal, and equal fingerprints are
//! treated as equal specs. This is change detection, not security; a
//! collision is an accepted, astronomically unlikely risk.

use std::hash::Hasher;

use k8s_openapi::api::core::v1::PodSpec;
use rustc_hash::FxHasher;

use crate::{Error, Result};

/// Compute the fingerprint of a pod spec
///
/// Deterministic across processes and runs: serde serializes struct fields
/// in declaration order, and FxHasher is seed-free. Every field of the pod
/// spec participates, so any change that could alter observable container
/// behavior changes the fingerprint.
pub fn fingerprint(spec: &PodSpec) -> Result<u64> {
    let bytes = serde_json::to_vec(spec)
        .map_err(|e| Error::serialization(format!("failed to encode pod spec: {e}")))?;
    let mut hasher = FxHasher::default();
    hasher.write(&bytes);
    Ok(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Container;

    fn pod_spec(image: &str) -> PodSpec {
        PodSpec {
            containers: vec![Container {
                name: "web".to_string(),
                image: Some(image.to_string()),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    /// Story: The same spec always hashes to the same value
    ///
    /// The controller recomputes fingerprints on every reconciliation; a
    /// non-deterministic hash would make every cycle look like a spec change
    /// and trigger endless cutovers.
    #[test]
    fn story_fingerprint_is_deterministic() {
        let a = fingerprint(&pod_spec("nginx:1.25")).unwrap();
        let b = fingerprint(&pod_spec("nginx:1.25")).unwrap();
        assert_eq!(a, b);
    }

    /// Story: Changing the image changes the fingerprint
    ///
    /// An image bump is the canonical reason for a cutover; it must be
    /// detected.
    #[test]
    fn story_image_change_changes_fingerprint() {
        let old = fingerprint(&pod_spec("nginx:1.25")).unwrap();
        let new = fingerprint(&pod_spec("nginx:1.26")).unwrap();
        assert_ne!(old, new);
    }

    /// Story: Any semantic field participates in the fingerprint
    ///
    /// Scheduling, restart policy, and similar fields all change observable
    /// behavior, so they must all be part of the comparison.
    #[test]
    fn story_non_container_fields_participate() {
        let plain = fingerprint(&pod_spec("nginx:1.25")).unwrap();

        let mut scheduled = pod_spec("nginx:1.25");
        scheduled.scheduler_name = Some("custom-scheduler".to_string());
        assert_ne!(plain, fingerprint(&scheduled).unwrap());

        let mut restarting = pod_spec("nginx:1.25");
        restarting.restart_policy = Some("OnFailure".to_string());
        assert_ne!(plain, fingerprint(&restarting).unwrap());
    }

    /// Story: A cloned spec fingerprints identically to its source
    ///
    /// Created ReplicaSets copy the desired pod spec verbatim, so right
    /// after creation the live template must compare equal to the desired
    /// spec.
    #[test]
    fn story_clone_preserves_fingerprint() {
        let spec = pod_spec("nginx:1.25");
        let copied = spec.clone();
        assert_eq!(fingerprint(&spec).unwrap(), fingerprint(&copied).unwrap());
    }
}
