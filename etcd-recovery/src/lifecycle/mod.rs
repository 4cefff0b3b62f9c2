//! Starting and stopping the etcd member and its supervisor.
//!
//! The kubelet runs whatever static pod manifests sit in its manifest
//! directory, so moving a manifest out stops the pod and moving it back
//! starts it again. Auxiliary units are driven through the host supervisor.

pub mod manifest;
pub mod supervisor;

pub use manifest::{
    manifest_state, start_all, start_manifest, stop_all, stop_manifest, ManifestState,
    CERT_RECOVERY_MANIFEST,
};
pub use supervisor::{start_supervised_service, stop_supervised_service, ServiceSupervisor, Systemctl};
