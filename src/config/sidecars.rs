//! Stock sidecars
//!
//! The external-* CSI sidecars shared by every driver definition. Drivers
//! customise them through the copying builders on [`SidecarConfig`].

use super::{AssetPatch, FlavourSet, SidecarConfig, CONTROLLER_ASSET_NAME};

/// external-provisioner
pub fn provisioner() -> SidecarConfig {
    SidecarConfig::new("common/sidecars/provisioner.yaml")
        .with_metrics_port("provisioner-m")
        .with_additional_assets([
            "common/rbac/provisioner_role.yaml",
            "common/rbac/provisioner_binding.yaml",
        ])
        .with_patches([AssetPatch::for_flavours(
            FlavourSet::hypershift(),
            CONTROLLER_ASSET_NAME,
            "common/hypershift/controller_add_kubeconfig_volume.yaml.patch",
        )])
}

/// external-attacher
pub fn attacher() -> SidecarConfig {
    SidecarConfig::new("common/sidecars/attacher.yaml")
        .with_metrics_port("attacher-m")
        .with_additional_assets([
            "common/rbac/attacher_role.yaml",
            "common/rbac/attacher_binding.yaml",
        ])
}

/// external-resizer
pub fn resizer() -> SidecarConfig {
    SidecarConfig::new("common/sidecars/resizer.yaml")
        .with_metrics_port("resizer-m")
        .with_additional_assets([
            "common/rbac/resizer_role.yaml",
            "common/rbac/resizer_binding.yaml",
        ])
}

/// external-snapshotter
pub fn snapshotter() -> SidecarConfig {
    SidecarConfig::new("common/sidecars/snapshotter.yaml")
        .with_metrics_port("snapshotter-m")
        .with_additional_assets([
            "common/rbac/snapshotter_role.yaml",
            "common/rbac/snapshotter_binding.yaml",
        ])
}

/// livenessprobe for the controller pod
pub fn controller_liveness_probe() -> SidecarConfig {
    SidecarConfig::new("common/sidecars/livenessprobe.yaml")
}

/// node-driver-registrar
pub fn node_driver_registrar() -> SidecarConfig {
    SidecarConfig::new("common/sidecars/node_driver_registrar.yaml")
}

/// livenessprobe for the node pod, watching the plugin socket
pub fn node_liveness_probe() -> SidecarConfig {
    SidecarConfig::new("common/sidecars/node_livenessprobe.yaml")
}
