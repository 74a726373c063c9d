//! AWS EBS CSI driver

use crate::config::sidecars::{
    attacher, controller_liveness_probe, node_driver_registrar, node_liveness_probe,
    provisioner, resizer, snapshotter,
};
use crate::config::{
    Asset, AssetPatch, ControlPlaneConfig, FlavourSet, GeneratorConfig, GuestConfig, MetricsPort,
    CONTROLLER_ASSET_NAME, NODE_ASSET_NAME,
};

pub const NAME: &str = "aws-ebs";

const DRIVER_METRICS_LOCAL_PORT: u16 = 8201;
const DRIVER_METRICS_EXPOSED_PORT: u16 = 9201;
const CONTROLLER_HEALTH_PORT: u16 = 10301;

pub fn config() -> GeneratorConfig {
    GeneratorConfig {
        asset_prefix: "aws-ebs-csi-driver".to_string(),
        asset_short_prefix: "ebs".to_string(),
        driver_name: "ebs.csi.aws.com".to_string(),
        controller: Some(controller()),
        guest: Some(guest()),
    }
}

fn controller() -> ControlPlaneConfig {
    ControlPlaneConfig {
        deployment_template_name: "overlays/aws-ebs/base/controller_add_driver.yaml".to_string(),
        metrics_ports: vec![MetricsPort {
            local_port: DRIVER_METRICS_LOCAL_PORT,
            exposed_port: DRIVER_METRICS_EXPOSED_PORT,
            name: "driver-m".to_string(),
            inject_proxy: true,
        }],
        sidecar_local_metrics_port_start: DRIVER_METRICS_LOCAL_PORT + 1,
        sidecar_exposed_metrics_port_start: DRIVER_METRICS_EXPOSED_PORT + 1,
        sidecars: vec![
            provisioner().with_extra_arguments(["--default-fstype=ext4", "--timeout=60s"]),
            attacher(),
            resizer(),
            snapshotter(),
            controller_liveness_probe()
                .with_extra_arguments([format!("--health-port={}", CONTROLLER_HEALTH_PORT)]),
        ],
        static_assets: vec![
            Asset::new("common/controller_sa.yaml"),
            Asset::new("common/controller_pdb.yaml"),
            Asset::for_flavours(
                FlavourSet::standalone(),
                "common/rbac/kube_rbac_proxy_binding.yaml",
            ),
        ],
        patches: vec![
            AssetPatch::for_flavours(
                FlavourSet::hypershift(),
                CONTROLLER_ASSET_NAME,
                "overlays/aws-ebs/patches/controller_add_hypershift_token_minter.yaml.patch",
            ),
            AssetPatch::for_flavours(
                FlavourSet::standalone(),
                "controller_sa.yaml",
                "overlays/aws-ebs/patches/controller_sa_add_role_arn.yaml.patch",
            ),
        ],
    }
}

fn guest() -> GuestConfig {
    GuestConfig {
        daemonset_template_name: "overlays/aws-ebs/base/node_add_driver.yaml".to_string(),
        sidecars: vec![node_driver_registrar(), node_liveness_probe()],
        static_assets: vec![
            Asset::new("overlays/aws-ebs/base/csidriver.yaml"),
            Asset::new("common/node_sa.yaml"),
            Asset::new("common/rbac/privileged_role.yaml"),
            Asset::new("common/rbac/node_privileged_binding.yaml"),
        ],
        storage_class_asset_names: vec![
            Asset::new("overlays/aws-ebs/base/storageclass_gp2.yaml"),
            Asset::new("overlays/aws-ebs/base/storageclass_gp3.yaml"),
        ],
        volume_snapshot_class_asset_names: vec![Asset::new(
            "overlays/aws-ebs/base/volumesnapshotclass.yaml",
        )],
        patches: vec![AssetPatch::new(
            NODE_ASSET_NAME,
            "overlays/aws-ebs/patches/node_add_host_network.yaml.patch",
        )],
    }
}
