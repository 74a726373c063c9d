//! Declarative Composition Model
//!
//! Describes, per flavour, which templates, static documents, sidecars and
//! patches make up a driver's manifests. All types here are plain owned
//! values; the builders on [`SidecarConfig`] return modified copies so one
//! stock sidecar can be shared by many driver definitions.

pub mod flavour;
pub mod sidecars;

pub use flavour::{ClusterFlavour, FlavourSet};

use crate::error::{Error, Result};
use crate::template::Replacements;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;

/// Placeholder for the namespace generated objects live in
pub const NAMESPACE_PLACEHOLDER: &str = "${NAMESPACE}";

/// Bundle key of the controller Deployment; patches use it as `source_name`
pub const CONTROLLER_ASSET_NAME: &str = "controller.yaml";
/// Bundle key of the node DaemonSet
pub const NODE_ASSET_NAME: &str = "node.yaml";

// =============================================================================
// Assets and Patches
// =============================================================================

/// Static document copied into the bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    /// Flavours this asset is generated for
    #[serde(default)]
    pub flavours: FlavourSet,
    /// Template name in the store
    pub name: String,
}

impl Asset {
    /// Asset included for every flavour
    pub fn new(name: impl Into<String>) -> Self {
        Self::for_flavours(FlavourSet::all(), name)
    }

    pub fn for_flavours(flavours: FlavourSet, name: impl Into<String>) -> Self {
        Self {
            flavours,
            name: name.into(),
        }
    }

    /// Bundle key: the template name without its directory
    pub fn base_name(&self) -> &str {
        base_name(&self.name)
    }
}

/// Patch merged into a document already in the bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetPatch {
    #[serde(default)]
    pub flavours: FlavourSet,
    /// Bundle key of the document to patch
    pub source_name: String,
    /// Template name of the patch in the store
    pub patch_name: String,
}

impl AssetPatch {
    pub fn new(source_name: impl Into<String>, patch_name: impl Into<String>) -> Self {
        Self::for_flavours(FlavourSet::all(), source_name, patch_name)
    }

    pub fn for_flavours(
        flavours: FlavourSet,
        source_name: impl Into<String>,
        patch_name: impl Into<String>,
    ) -> Self {
        Self {
            flavours,
            source_name: source_name.into(),
            patch_name: patch_name.into(),
        }
    }
}

/// Strip any directory prefix from a template name
pub fn base_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

// =============================================================================
// Metrics Ports
// =============================================================================

/// Metrics endpoint of the driver container itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsPort {
    /// Port the driver listens on inside the pod
    pub local_port: u16,
    /// Port exposed through the metrics Service
    pub exposed_port: u16,
    /// Port name in the Service and ServiceMonitor
    pub name: String,
    /// Put an authenticating proxy container in front of the endpoint
    #[serde(default)]
    pub inject_proxy: bool,
}

// =============================================================================
// Sidecars
// =============================================================================

/// Reusable add-on container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarConfig {
    /// Template merged into the primary workload
    pub template_name: String,
    /// Arguments appended to the sidecar container
    #[serde(default)]
    pub extra_arguments: Vec<String>,
    /// Whether the sidecar takes a port pair from the allocator
    #[serde(default)]
    pub has_metrics_port: bool,
    #[serde(default)]
    pub metrics_port_name: String,
    /// Static documents the sidecar needs (RBAC and friends)
    #[serde(default)]
    pub guest_asset_names: Vec<String>,
    /// Patches applied once the surface is assembled
    #[serde(default)]
    pub patches: Vec<AssetPatch>,
    #[serde(default)]
    pub flavours: FlavourSet,
}

impl SidecarConfig {
    /// Sidecar without metrics, assets or patches
    pub fn new(template_name: impl Into<String>) -> Self {
        Self {
            template_name: template_name.into(),
            extra_arguments: Vec::new(),
            has_metrics_port: false,
            metrics_port_name: String::new(),
            guest_asset_names: Vec::new(),
            patches: Vec::new(),
            flavours: FlavourSet::all(),
        }
    }

    /// Copy with a metrics port of the given name
    pub fn with_metrics_port(&self, port_name: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.has_metrics_port = true;
        copy.metrics_port_name = port_name.into();
        copy
    }

    /// Copy with additional container arguments
    pub fn with_extra_arguments<I, S>(&self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut copy = self.clone();
        copy.extra_arguments
            .extend(arguments.into_iter().map(Into::into));
        copy
    }

    /// Copy with additional static documents
    pub fn with_additional_assets<I, S>(&self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut copy = self.clone();
        copy.guest_asset_names
            .extend(names.into_iter().map(Into::into));
        copy
    }

    /// Copy with additional patches
    pub fn with_patches(&self, patches: impl IntoIterator<Item = AssetPatch>) -> Self {
        let mut copy = self.clone();
        copy.patches.extend(patches);
        copy
    }

    /// Copy restricted to the given flavours
    pub fn for_flavours(&self, flavours: FlavourSet) -> Self {
        let mut copy = self.clone();
        copy.flavours = flavours;
        copy
    }

    pub fn is_included(&self, flavour: ClusterFlavour) -> bool {
        self.flavours.contains(flavour)
    }
}

// =============================================================================
// Surfaces
// =============================================================================

/// Control-plane surface: the controller Deployment and its companions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneConfig {
    /// Driver-specific patch merged onto the base controller template
    pub deployment_template_name: String,
    #[serde(default)]
    pub metrics_ports: Vec<MetricsPort>,
    /// First local port handed to metrics-bearing sidecars
    pub sidecar_local_metrics_port_start: u16,
    /// First exposed port handed to metrics-bearing sidecars
    pub sidecar_exposed_metrics_port_start: u16,
    /// Sidecars in the order their containers appear
    #[serde(default)]
    pub sidecars: Vec<SidecarConfig>,
    #[serde(default)]
    pub static_assets: Vec<Asset>,
    #[serde(default)]
    pub patches: Vec<AssetPatch>,
}

/// Guest surface: the node DaemonSet and cluster-scoped objects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestConfig {
    /// Driver-specific patch merged onto the base node template
    pub daemonset_template_name: String,
    #[serde(default)]
    pub sidecars: Vec<SidecarConfig>,
    #[serde(default)]
    pub static_assets: Vec<Asset>,
    #[serde(default)]
    pub storage_class_asset_names: Vec<Asset>,
    #[serde(default)]
    pub volume_snapshot_class_asset_names: Vec<Asset>,
    #[serde(default)]
    pub patches: Vec<AssetPatch>,
}

/// Complete composition model of one CSI driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorConfig {
    /// Prefix of generated object names, e.g. `aws-ebs-csi-driver`
    pub asset_prefix: String,
    /// Short prefix for names with length limits, e.g. `ebs`
    pub asset_short_prefix: String,
    /// CSI driver name, e.g. `ebs.csi.aws.com`
    #[serde(default)]
    pub driver_name: String,
    #[serde(default)]
    pub controller: Option<ControlPlaneConfig>,
    #[serde(default)]
    pub guest: Option<GuestConfig>,
}

impl GeneratorConfig {
    /// Parse a composition model from YAML
    pub fn from_yaml(data: &[u8]) -> Result<Self> {
        let config: GeneratorConfig = serde_yaml::from_slice(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the model for mistakes that would otherwise surface mid-run
    pub fn validate(&self) -> Result<()> {
        if self.asset_prefix.is_empty() || self.asset_short_prefix.is_empty() {
            return Err(Error::Configuration(
                "assetPrefix and assetShortPrefix must not be empty".to_string(),
            ));
        }

        if self.controller.is_none() && self.guest.is_none() {
            return Err(Error::Configuration(format!(
                "Driver {} defines neither a controller nor a guest surface",
                self.asset_prefix
            )));
        }

        if let Some(ctrl) = &self.controller {
            if ctrl.deployment_template_name.is_empty() {
                return Err(Error::Configuration(
                    "controller.deploymentTemplateName must not be empty".to_string(),
                ));
            }
            validate_sidecars("controller", &ctrl.sidecars)?;
            validate_metrics_ports(&ctrl.metrics_ports)?;
        }

        if let Some(guest) = &self.guest {
            if guest.daemonset_template_name.is_empty() {
                return Err(Error::Configuration(
                    "guest.daemonsetTemplateName must not be empty".to_string(),
                ));
            }
            validate_sidecars("guest", &guest.sidecars)?;
            if let Some(sidecar) = guest.sidecars.iter().find(|s| s.has_metrics_port) {
                return Err(Error::Configuration(format!(
                    "guest sidecar {} has a metrics port; ports are only allocated on the controller",
                    sidecar.template_name
                )));
            }
        }

        for entry in self.never_included() {
            warn!("{} applies to no flavour and is never generated", entry);
        }

        Ok(())
    }

    /// Entries whose flavour set is empty, e.g. `guest storage class sc.yaml`
    ///
    /// They are valid but no run ever generates or applies them.
    pub fn never_included(&self) -> Vec<String> {
        let mut unused = Vec::new();

        if let Some(ctrl) = &self.controller {
            collect_never_included(
                &mut unused,
                "controller",
                &ctrl.sidecars,
                &ctrl.static_assets,
                &ctrl.patches,
            );
        }

        if let Some(guest) = &self.guest {
            collect_never_included(
                &mut unused,
                "guest",
                &guest.sidecars,
                &guest.static_assets,
                &guest.patches,
            );
            let classes = guest
                .storage_class_asset_names
                .iter()
                .map(|a| ("storage class", a))
                .chain(
                    guest
                        .volume_snapshot_class_asset_names
                        .iter()
                        .map(|a| ("snapshot class", a)),
                );
            for (kind, asset) in classes {
                if asset.flavours.is_empty() {
                    unused.push(format!("guest {} {}", kind, asset.name));
                }
            }
        }

        unused
    }
}

fn validate_sidecars(surface: &str, sidecars: &[SidecarConfig]) -> Result<()> {
    for sidecar in sidecars {
        if sidecar.template_name.is_empty() {
            return Err(Error::Configuration(format!(
                "{} sidecar without a template name",
                surface
            )));
        }
        if sidecar.has_metrics_port && sidecar.metrics_port_name.is_empty() {
            return Err(Error::Configuration(format!(
                "{} sidecar {} has a metrics port but no port name",
                surface, sidecar.template_name
            )));
        }
    }
    Ok(())
}

fn validate_metrics_ports(ports: &[MetricsPort]) -> Result<()> {
    let mut names = BTreeSet::new();
    for port in ports {
        if !names.insert(port.name.as_str()) {
            return Err(Error::Configuration(format!(
                "Duplicate metrics port name: {}",
                port.name
            )));
        }
    }
    Ok(())
}

fn collect_never_included(
    unused: &mut Vec<String>,
    surface: &str,
    sidecars: &[SidecarConfig],
    static_assets: &[Asset],
    patches: &[AssetPatch],
) {
    for sidecar in sidecars {
        if sidecar.flavours.is_empty() {
            unused.push(format!("{} sidecar {}", surface, sidecar.template_name));
            continue;
        }
        for patch in sidecar.patches.iter().filter(|p| p.flavours.is_empty()) {
            unused.push(format!(
                "{} sidecar {} patch {}",
                surface, sidecar.template_name, patch.patch_name
            ));
        }
    }

    for asset in static_assets.iter().filter(|a| a.flavours.is_empty()) {
        unused.push(format!("{} static asset {}", surface, asset.name));
    }

    for patch in patches.iter().filter(|p| p.flavours.is_empty()) {
        unused.push(format!("{} patch {}", surface, patch.patch_name));
    }
}

// =============================================================================
// Runtime Configuration
// =============================================================================

/// Per-invocation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Flavour to generate for
    pub flavour: ClusterFlavour,
    /// Global substitutions, applied after all others
    pub replacements: Replacements,
}

impl RuntimeConfig {
    pub fn new(flavour: ClusterFlavour) -> Self {
        Self {
            flavour,
            replacements: Replacements::new(),
        }
    }

    /// Substitute `${NAMESPACE}` with `namespace`
    pub fn with_namespace(self, namespace: impl Into<String>) -> Self {
        self.with_replacement(NAMESPACE_PLACEHOLDER, namespace)
    }

    pub fn with_replacement(
        mut self,
        placeholder: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.replacements.push(placeholder, value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("overlays/aws-ebs/base/csidriver.yaml"), "csidriver.yaml");
        assert_eq!(base_name("csidriver.yaml"), "csidriver.yaml");
        assert_eq!(Asset::new("common/rbac/attacher_role.yaml").base_name(), "attacher_role.yaml");
    }

    #[test]
    fn test_sidecar_builders_copy() {
        let stock = SidecarConfig::new("common/sidecars/provisioner.yaml").with_metrics_port("provisioner-m");
        let custom = stock
            .with_extra_arguments(["--default-fstype=ext4"])
            .with_additional_assets(["common/rbac/provisioner_role.yaml"])
            .with_patches([AssetPatch::new("controller.yaml", "patches/provisioner.yaml")])
            .for_flavours(FlavourSet::standalone());

        assert!(stock.extra_arguments.is_empty());
        assert!(stock.guest_asset_names.is_empty());
        assert!(stock.patches.is_empty());
        assert!(stock.is_included(ClusterFlavour::HyperShift));

        assert_eq!(custom.extra_arguments, vec!["--default-fstype=ext4"]);
        assert_eq!(custom.guest_asset_names.len(), 1);
        assert_eq!(custom.patches.len(), 1);
        assert!(!custom.is_included(ClusterFlavour::HyperShift));
        assert_eq!(custom.metrics_port_name, "provisioner-m");
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
assetPrefix: test-csi-driver
assetShortPrefix: test
driverName: test.csi.example.com
controller:
  deploymentTemplateName: overlays/test/controller.yaml
  sidecarLocalMetricsPortStart: 8202
  sidecarExposedMetricsPortStart: 9202
  metricsPorts:
    - localPort: 8201
      exposedPort: 9201
      name: driver-m
      injectProxy: true
  sidecars:
    - templateName: common/sidecars/provisioner.yaml
      hasMetricsPort: true
      metricsPortName: provisioner-m
      extraArguments: ["--v=2"]
  staticAssets:
    - name: common/controller_sa.yaml
    - name: common/hypershift/kubeconfig.yaml
      flavours: [hypershift]
  patches:
    - sourceName: controller.yaml
      patchName: overlays/test/hypershift.yaml.patch
      flavours: [hypershift]
"#;
        let config = GeneratorConfig::from_yaml(yaml.as_bytes()).unwrap();
        let ctrl = config.controller.as_ref().unwrap();

        assert!(config.guest.is_none());
        assert_eq!(ctrl.metrics_ports[0].local_port, 8201);
        assert!(ctrl.metrics_ports[0].inject_proxy);
        assert_eq!(ctrl.sidecars[0].flavours, FlavourSet::all());
        assert_eq!(ctrl.static_assets[0].flavours, FlavourSet::all());
        assert_eq!(ctrl.static_assets[1].flavours, FlavourSet::hypershift());
        assert_eq!(ctrl.patches[0].source_name, "controller.yaml");
    }

    #[test]
    fn test_validate_rejects_bad_models() {
        let mut config = GeneratorConfig {
            asset_prefix: "x-csi-driver".into(),
            asset_short_prefix: "x".into(),
            driver_name: "x.csi.example.com".into(),
            controller: None,
            guest: None,
        };
        assert_matches!(config.validate(), Err(Error::Configuration(_)));

        config.controller = Some(ControlPlaneConfig {
            deployment_template_name: "controller.yaml".into(),
            metrics_ports: Vec::new(),
            sidecar_local_metrics_port_start: 8202,
            sidecar_exposed_metrics_port_start: 9202,
            sidecars: vec![SidecarConfig {
                has_metrics_port: true,
                ..SidecarConfig::new("common/sidecars/attacher.yaml")
            }],
            static_assets: Vec::new(),
            patches: Vec::new(),
        });
        assert_matches!(config.validate(), Err(Error::Configuration(msg)) if msg.contains("no port name"));
    }

    #[test]
    fn test_entries_without_flavours_validate_but_are_reported() {
        let config = GeneratorConfig {
            asset_prefix: "x-csi-driver".into(),
            asset_short_prefix: "x".into(),
            driver_name: "x.csi.example.com".into(),
            controller: Some(ControlPlaneConfig {
                deployment_template_name: "controller.yaml".into(),
                metrics_ports: Vec::new(),
                sidecar_local_metrics_port_start: 8202,
                sidecar_exposed_metrics_port_start: 9202,
                sidecars: vec![
                    SidecarConfig::new("common/sidecars/attacher.yaml").for_flavours(FlavourSet::new([])),
                    SidecarConfig::new("common/sidecars/resizer.yaml").with_patches([AssetPatch::for_flavours(
                        FlavourSet::new([]),
                        "controller.yaml",
                        "common/sidecars/resizer.patch",
                    )]),
                ],
                static_assets: vec![Asset::new("common/controller_sa.yaml")],
                patches: Vec::new(),
            }),
            guest: Some(GuestConfig {
                daemonset_template_name: "node.yaml".into(),
                sidecars: Vec::new(),
                static_assets: Vec::new(),
                storage_class_asset_names: vec![
                    Asset::for_flavours(FlavourSet::new([]), "overlays/x/storageclass_gp3.yaml"),
                    Asset::new("overlays/x/storageclass_gp2.yaml"),
                ],
                volume_snapshot_class_asset_names: vec![Asset::for_flavours(
                    FlavourSet::new([]),
                    "overlays/x/volumesnapshotclass.yaml",
                )],
                patches: Vec::new(),
            }),
        };

        assert!(config.validate().is_ok());
        assert_eq!(
            config.never_included(),
            vec![
                "controller sidecar common/sidecars/attacher.yaml",
                "controller sidecar common/sidecars/resizer.yaml patch common/sidecars/resizer.patch",
                "guest storage class overlays/x/storageclass_gp3.yaml",
                "guest snapshot class overlays/x/volumesnapshotclass.yaml",
            ]
        );
    }

    #[test]
    fn test_runtime_config() {
        let runtime = RuntimeConfig::new(ClusterFlavour::Standalone)
            .with_namespace("openshift-cluster-csi-drivers")
            .with_replacement("${CLUSTER_ID}", "abc");

        assert_eq!(runtime.replacements.pairs().len(), 2);
        assert_eq!(
            runtime.replacements.apply(b"${NAMESPACE}/${CLUSTER_ID}"),
            b"openshift-cluster-csi-drivers/abc"
        );
    }
}
