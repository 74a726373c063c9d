//! Asset Generator
//!
//! Turns a [`GeneratorConfig`] and a requested flavour into a
//! [`GeneratedAssets`] bundle. One run is strictly sequential:
//!
//! 1. controller Deployment: base template, driver template, flavour patch,
//!    proxy containers for driver metrics ports, sidecars
//! 2. metrics Service and ServiceMonitor
//! 3. control-plane static documents
//! 4. control-plane patches
//! 5. node DaemonSet, guest static documents, storage classes, volume
//!    snapshot classes, guest patches
//!
//! Any failure aborts the run and nothing is returned but the error.

pub mod ports;

pub use ports::{MetricsEndpoint, PortAllocator, PortPair, PortPlan};

use crate::bundle::{GeneratedAssets, Surface};
use crate::config::{
    base_name, Asset, AssetPatch, ClusterFlavour, ControlPlaneConfig, GeneratorConfig,
    GuestConfig, RuntimeConfig, SidecarConfig,
};
use crate::error::{Error, Result};
use crate::store::TemplateStore;
use crate::template::{extra_argument_operations, overlay_merge, point_patch, Document, Replacements};
use std::collections::BTreeMap;
use tracing::{debug, info};

// =============================================================================
// Template Names and Placeholders
// =============================================================================

pub const BASE_CONTROLLER_TEMPLATE: &str = "base/controller.yaml";
pub const BASE_NODE_TEMPLATE: &str = "base/node.yaml";
pub const BASE_METRICS_SERVICE_TEMPLATE: &str = "base/controller_metrics_service.yaml";
pub const BASE_SERVICE_MONITOR_TEMPLATE: &str = "base/controller_metrics_servicemonitor.yaml";
pub const METRICS_SERVICE_PORT_PATCH: &str = "common/metrics_service_port.yaml.patch";
pub const SERVICE_MONITOR_ENDPOINT_PATCH: &str = "common/metrics_service_monitor_port.yaml.patch";
pub const KUBE_RBAC_PROXY_TEMPLATE: &str = "common/sidecars/kube_rbac_proxy.yaml";

pub const ASSET_PREFIX_PLACEHOLDER: &str = "${ASSET_PREFIX}";
pub const ASSET_SHORT_PREFIX_PLACEHOLDER: &str = "${ASSET_SHORT_PREFIX}";
pub const DRIVER_NAME_PLACEHOLDER: &str = "${DRIVER_NAME}";
pub const LOCAL_METRICS_PORT_PLACEHOLDER: &str = "${LOCAL_METRICS_PORT}";
pub const EXPOSED_METRICS_PORT_PLACEHOLDER: &str = "${EXPOSED_METRICS_PORT}";
pub const PORT_NAME_PLACEHOLDER: &str = "${PORT_NAME}";

/// Flavour patch of a surface's primary document, e.g.
/// `common/hypershift/controller.yaml.patch`
pub fn flavour_patch_name(flavour: ClusterFlavour, surface: Surface) -> String {
    format!("common/{}/{}.patch", flavour, surface.primary_name())
}

fn metrics_replacements(port_name: &str, ports: PortPair) -> Replacements {
    Replacements::new()
        .with(LOCAL_METRICS_PORT_PLACEHOLDER, ports.local.to_string())
        .with(EXPOSED_METRICS_PORT_PLACEHOLDER, ports.exposed.to_string())
        .with(PORT_NAME_PLACEHOLDER, port_name)
}

// =============================================================================
// Asset Generator
// =============================================================================

/// Generator bound to one driver config and one flavour
pub struct AssetGenerator<S> {
    config: GeneratorConfig,
    flavour: ClusterFlavour,
    /// Driver defaults followed by runtime pairs
    replacements: Replacements,
    store: S,
}

impl<S: TemplateStore> AssetGenerator<S> {
    /// Create a generator
    pub fn new(config: GeneratorConfig, runtime: RuntimeConfig, store: S) -> Self {
        let defaults = Replacements::new()
            .with(ASSET_PREFIX_PLACEHOLDER, config.asset_prefix.clone())
            .with(ASSET_SHORT_PREFIX_PLACEHOLDER, config.asset_short_prefix.clone())
            .with(DRIVER_NAME_PLACEHOLDER, config.driver_name.clone());

        Self {
            flavour: runtime.flavour,
            replacements: defaults.chain(&runtime.replacements),
            config,
            store,
        }
    }

    pub fn flavour(&self) -> ClusterFlavour {
        self.flavour
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Run the whole pipeline and return a fresh bundle
    pub fn generate(&self) -> Result<GeneratedAssets> {
        info!(
            "Generating assets for {} ({})",
            self.config.asset_prefix, self.flavour
        );
        self.config.validate()?;

        let mut assets = GeneratedAssets::default();

        if let Some(ctrl) = &self.config.controller {
            let ports = PortPlan::build(ctrl, self.flavour)?;
            self.generate_deployment(ctrl, &ports, &mut assets)?;
            self.generate_monitoring_service(&ports, &mut assets)?;
            self.collect_controller_static_assets(ctrl, &mut assets)?;
            self.patch_controller(ctrl, &mut assets)?;
        }

        if let Some(guest) = &self.config.guest {
            self.generate_daemonset(guest, &mut assets)?;
            self.collect_guest_static_assets(guest, &mut assets)?;
            self.collect_storage_classes(guest, &mut assets)?;
            self.collect_volume_snapshot_classes(guest, &mut assets)?;
            self.patch_guest(guest, &mut assets)?;
        }

        info!(
            "Generated {} controller and {} guest static documents",
            assets.controller_static_assets().len(),
            assets.guest_static_assets().len()
        );
        Ok(assets)
    }

    // =========================================================================
    // Controller
    // =========================================================================

    fn generate_deployment(
        &self,
        ctrl: &ControlPlaneConfig,
        ports: &PortPlan,
        assets: &mut GeneratedAssets,
    ) -> Result<()> {
        let mut deployment = self.primary_document(
            BASE_CONTROLLER_TEMPLATE,
            &ctrl.deployment_template_name,
            Surface::Controller,
        )?;

        for endpoint in ports.proxies() {
            debug!(
                "Injecting metrics proxy for {} ({} -> {})",
                endpoint.name, endpoint.ports.local, endpoint.ports.exposed
            );
            let extra = metrics_replacements(&endpoint.name, endpoint.ports);
            deployment = self.apply_patch(deployment, KUBE_RBAC_PROXY_TEMPLATE, &extra)?;
        }

        if let Some(sidecars) = self.compose_sidecars(&ctrl.sidecars, Some(ports))? {
            deployment = overlay_merge(deployment, sidecars);
        }

        assets.set_primary(Surface::Controller, deployment.to_yaml()?);
        Ok(())
    }

    fn generate_monitoring_service(&self, ports: &PortPlan, assets: &mut GeneratedAssets) -> Result<()> {
        if ports.is_empty() {
            debug!("No metrics endpoints, skipping metrics Service");
            return Ok(());
        }

        let none = Replacements::new();
        let mut service = self.read_document(BASE_METRICS_SERVICE_TEMPLATE, &none)?;
        let mut monitor = self.read_document(BASE_SERVICE_MONITOR_TEMPLATE, &none)?;

        for endpoint in ports.service_endpoints() {
            let extra = metrics_replacements(&endpoint.name, endpoint.ports);
            service = self.apply_patch(service, METRICS_SERVICE_PORT_PATCH, &extra)?;
            monitor = self.apply_patch(monitor, SERVICE_MONITOR_ENDPOINT_PATCH, &extra)?;
        }

        let documents = assets.static_assets_mut(Surface::Controller);
        documents.insert(base_name(BASE_METRICS_SERVICE_TEMPLATE).to_string(), service.to_yaml()?);
        documents.insert(base_name(BASE_SERVICE_MONITOR_TEMPLATE).to_string(), monitor.to_yaml()?);
        Ok(())
    }

    fn collect_controller_static_assets(
        &self,
        ctrl: &ControlPlaneConfig,
        assets: &mut GeneratedAssets,
    ) -> Result<()> {
        self.collect_surface_static_assets(Surface::Controller, &ctrl.static_assets, &ctrl.sidecars, assets)
    }

    fn patch_controller(&self, ctrl: &ControlPlaneConfig, assets: &mut GeneratedAssets) -> Result<()> {
        self.apply_surface_patches(Surface::Controller, &ctrl.sidecars, &ctrl.patches, assets)
    }

    // =========================================================================
    // Guest
    // =========================================================================

    fn generate_daemonset(&self, guest: &GuestConfig, assets: &mut GeneratedAssets) -> Result<()> {
        let mut daemonset = self.primary_document(
            BASE_NODE_TEMPLATE,
            &guest.daemonset_template_name,
            Surface::Guest,
        )?;

        if let Some(sidecars) = self.compose_sidecars(&guest.sidecars, None)? {
            daemonset = overlay_merge(daemonset, sidecars);
        }

        assets.set_primary(Surface::Guest, daemonset.to_yaml()?);
        Ok(())
    }

    fn collect_guest_static_assets(&self, guest: &GuestConfig, assets: &mut GeneratedAssets) -> Result<()> {
        self.collect_surface_static_assets(Surface::Guest, &guest.static_assets, &guest.sidecars, assets)
    }

    fn collect_storage_classes(&self, guest: &GuestConfig, assets: &mut GeneratedAssets) -> Result<()> {
        let mut origins = BTreeMap::new();
        for asset in self.matching(&guest.storage_class_asset_names) {
            let data = self.read_asset(&asset.name, &Replacements::new())?;
            insert_unique(assets.storage_classes_mut(), &mut origins, &asset.name, data)?;
        }
        Ok(())
    }

    fn collect_volume_snapshot_classes(&self, guest: &GuestConfig, assets: &mut GeneratedAssets) -> Result<()> {
        let mut origins = BTreeMap::new();
        for asset in self.matching(&guest.volume_snapshot_class_asset_names) {
            let data = self.read_asset(&asset.name, &Replacements::new())?;
            insert_unique(assets.volume_snapshot_classes_mut(), &mut origins, &asset.name, data)?;
        }
        Ok(())
    }

    fn patch_guest(&self, guest: &GuestConfig, assets: &mut GeneratedAssets) -> Result<()> {
        self.apply_surface_patches(Surface::Guest, &guest.sidecars, &guest.patches, assets)
    }

    // =========================================================================
    // Shared Steps
    // =========================================================================

    /// Base template, driver template, then the flavour patch
    fn primary_document(&self, base: &str, driver_template: &str, surface: Surface) -> Result<Document> {
        let none = Replacements::new();
        let document = self.read_document(base, &none)?;
        let document = self.apply_patch(document, driver_template, &none)?;
        self.apply_patch(document, &flavour_patch_name(self.flavour, surface), &none)
    }

    /// Merge the flavour's sidecars into one document
    ///
    /// The containers of the result are in declared sidecar order, which is
    /// the order they must follow the primary container in. Sidecars are
    /// visited last to first and each one is merged *in front of* what has
    /// been composed so far (`overlay_merge(sidecar, composed)`): overlay
    /// merge appends the overlay's lists, so the newly read sidecar becomes
    /// the base and ends up ahead of every sidecar declared after it.
    /// Iterating forward here would reverse the container order.
    fn compose_sidecars(
        &self,
        sidecars: &[SidecarConfig],
        ports: Option<&PortPlan>,
    ) -> Result<Option<Document>> {
        let mut composed: Option<Document> = None;

        for (index, sidecar) in sidecars.iter().enumerate().rev() {
            if !sidecar.is_included(self.flavour) {
                debug!("Skipping sidecar {} for {}", sidecar.template_name, self.flavour);
                continue;
            }

            let extra = match ports.and_then(|p| p.sidecar_ports(index)) {
                Some(pair) => metrics_replacements(&sidecar.metrics_port_name, pair),
                None => Replacements::new(),
            };
            let document = self.sidecar_document(sidecar, &extra)?;

            composed = Some(match composed {
                Some(rest) => overlay_merge(document, rest),
                None => document,
            });
        }

        Ok(composed)
    }

    /// Read a sidecar template and append its extra arguments
    fn sidecar_document(&self, sidecar: &SidecarConfig, extra: &Replacements) -> Result<Document> {
        debug!("Adding sidecar {}", sidecar.template_name);
        let document = self.read_document(&sidecar.template_name, extra)?;
        if sidecar.extra_arguments.is_empty() {
            return Ok(document);
        }

        let replacements = extra.chain(&self.replacements);
        let arguments: Vec<String> = sidecar
            .extra_arguments
            .iter()
            .map(|arg| String::from_utf8_lossy(&replacements.apply(arg.as_bytes())).into_owned())
            .collect();
        point_patch(document, &extra_argument_operations(&arguments))
    }

    /// Static documents of a surface plus the assets its sidecars bring along
    fn collect_surface_static_assets(
        &self,
        surface: Surface,
        static_assets: &[Asset],
        sidecars: &[SidecarConfig],
        assets: &mut GeneratedAssets,
    ) -> Result<()> {
        let none = Replacements::new();
        let mut origins = BTreeMap::new();

        for asset in self.matching(static_assets) {
            let data = self.read_asset(&asset.name, &none)?;
            insert_unique(assets.static_assets_mut(surface), &mut origins, &asset.name, data)?;
        }

        for sidecar in sidecars.iter().filter(|s| s.is_included(self.flavour)) {
            for name in &sidecar.guest_asset_names {
                let data = self.read_asset(name, &none)?;
                insert_unique(assets.static_assets_mut(surface), &mut origins, name, data)?;
            }
        }

        debug!(
            "Collected {} {} static documents",
            assets.static_assets_mut(surface).len(),
            surface
        );
        Ok(())
    }

    /// Sidecar patches in sidecar order, then the surface's own patches
    fn apply_surface_patches(
        &self,
        surface: Surface,
        sidecars: &[SidecarConfig],
        patches: &[AssetPatch],
        assets: &mut GeneratedAssets,
    ) -> Result<()> {
        let sidecar_patches = sidecars
            .iter()
            .filter(|s| s.is_included(self.flavour))
            .flat_map(|s| s.patches.iter());

        for patch in sidecar_patches.chain(patches) {
            if !patch.flavours.contains(self.flavour) {
                continue;
            }
            self.apply_asset_patch(surface, patch, assets)?;
        }
        Ok(())
    }

    fn apply_asset_patch(&self, surface: Surface, patch: &AssetPatch, assets: &mut GeneratedAssets) -> Result<()> {
        debug!("Patching {} {} with {}", surface, patch.source_name, patch.patch_name);

        let target = assets
            .patch_target_mut(surface, &patch.source_name)
            .ok_or_else(|| Error::PatchTargetNotFound {
                source_name: patch.source_name.clone(),
                patch_name: patch.patch_name.clone(),
            })?;

        let source = Document::parse(patch.source_name.clone(), target.as_slice())?;
        let patched = self.apply_patch(source, &patch.patch_name, &Replacements::new())?;
        *target = patched.to_yaml()?;
        Ok(())
    }

    // =========================================================================
    // Template Access
    // =========================================================================

    fn matching<'a>(&'a self, assets: &'a [Asset]) -> impl Iterator<Item = &'a Asset> + 'a {
        assets.iter().filter(move |a| a.flavours.contains(self.flavour))
    }

    /// Read a template and run substitution: `extra` first, then defaults
    /// and runtime pairs
    fn read_asset(&self, name: &str, extra: &Replacements) -> Result<Vec<u8>> {
        let raw = self.store.read(name)?;
        Ok(extra.chain(&self.replacements).apply(&raw))
    }

    fn read_document(&self, name: &str, extra: &Replacements) -> Result<Document> {
        Document::parse(name, &self.read_asset(name, extra)?)
    }

    /// Overlay-merge the template `patch_name` onto `source`
    fn apply_patch(&self, source: Document, patch_name: &str, extra: &Replacements) -> Result<Document> {
        let patch = self.read_document(patch_name, extra)?;
        Ok(overlay_merge(source, patch))
    }
}

/// Insert a static document, refusing two templates that share a base name
fn insert_unique(
    documents: &mut BTreeMap<String, Vec<u8>>,
    origins: &mut BTreeMap<String, String>,
    template_name: &str,
    data: Vec<u8>,
) -> Result<()> {
    let key = base_name(template_name).to_string();

    // Several sidecars may bring the same template along
    if origins.get(&key).map(String::as_str) == Some(template_name) {
        return Ok(());
    }
    if documents.contains_key(&key) {
        return Err(Error::Configuration(format!(
            "{} maps to bundle document {}, which is already taken",
            template_name, key
        )));
    }

    origins.insert(key.clone(), template_name.to_string());
    documents.insert(key, data);
    Ok(())
}
