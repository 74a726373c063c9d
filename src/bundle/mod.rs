//! Output Bundle
//!
//! The documents produced by one generation run, and their on-disk layout:
//!
//! ```text
//! <root>/
//!   manifest.yaml                 index of everything below
//!   controller.yaml               controller Deployment
//!   node.yaml                     node DaemonSet
//!   controller/<name>             control-plane static documents
//!   guest/<name>                  guest static documents
//!   storageclasses/<name>
//!   volumesnapshotclasses/<name>
//! ```
//!
//! Every document is canonicalized on save, so `load(save(b))` equals
//! `b.sanitized()`.

pub mod sanitize;

pub use sanitize::{sanitize, sanitize_file};

use crate::config::{CONTROLLER_ASSET_NAME, NODE_ASSET_NAME};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// File name of the bundle index
pub const INDEX_FILE_NAME: &str = "manifest.yaml";

const CONTROLLER_STATIC_DIR: &str = "controller";
const GUEST_STATIC_DIR: &str = "guest";
const STORAGE_CLASS_DIR: &str = "storageclasses";
const VOLUME_SNAPSHOT_CLASS_DIR: &str = "volumesnapshotclasses";

/// Which half of the deployment a document belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Controller,
    Guest,
}

impl Surface {
    /// Bundle key of this surface's primary document
    pub fn primary_name(&self) -> &'static str {
        match self {
            Surface::Controller => CONTROLLER_ASSET_NAME,
            Surface::Guest => NODE_ASSET_NAME,
        }
    }
}

impl std::fmt::Display for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Surface::Controller => write!(f, "controller"),
            Surface::Guest => write!(f, "guest"),
        }
    }
}

// =============================================================================
// Generated Assets
// =============================================================================

/// Documents produced by one generation run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedAssets {
    controller: Option<Vec<u8>>,
    node: Option<Vec<u8>>,
    controller_static: BTreeMap<String, Vec<u8>>,
    guest_static: BTreeMap<String, Vec<u8>>,
    storage_classes: BTreeMap<String, Vec<u8>>,
    volume_snapshot_classes: BTreeMap<String, Vec<u8>>,
}

impl GeneratedAssets {
    /// The controller Deployment
    pub fn controller(&self) -> Option<&[u8]> {
        self.controller.as_deref()
    }

    /// The node DaemonSet
    pub fn node(&self) -> Option<&[u8]> {
        self.node.as_deref()
    }

    pub fn controller_static_assets(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.controller_static
    }

    pub fn guest_static_assets(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.guest_static
    }

    pub fn storage_classes(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.storage_classes
    }

    pub fn volume_snapshot_classes(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.volume_snapshot_classes
    }

    /// Index describing this bundle
    pub fn index(&self) -> BundleIndex {
        BundleIndex {
            controller: self.controller.as_ref().map(|_| CONTROLLER_ASSET_NAME.to_string()),
            node: self.node.as_ref().map(|_| NODE_ASSET_NAME.to_string()),
            controller_static_assets: self.controller_static.keys().cloned().collect(),
            guest_static_assets: self.guest_static.keys().cloned().collect(),
            storage_class_assets: self.storage_classes.keys().cloned().collect(),
            volume_snapshot_class_assets: self.volume_snapshot_classes.keys().cloned().collect(),
        }
    }

    /// Copy with every document canonicalized
    pub fn sanitized(&self) -> Result<Self> {
        Ok(Self {
            controller: self.controller.as_deref().map(sanitize).transpose()?,
            node: self.node.as_deref().map(sanitize).transpose()?,
            controller_static: sanitize_map(&self.controller_static)?,
            guest_static: sanitize_map(&self.guest_static)?,
            storage_classes: sanitize_map(&self.storage_classes)?,
            volume_snapshot_classes: sanitize_map(&self.volume_snapshot_classes)?,
        })
    }

    // =========================================================================
    // Mutation, generator only
    // =========================================================================

    pub(crate) fn set_primary(&mut self, surface: Surface, data: Vec<u8>) {
        match surface {
            Surface::Controller => self.controller = Some(data),
            Surface::Guest => self.node = Some(data),
        }
    }

    pub(crate) fn static_assets_mut(&mut self, surface: Surface) -> &mut BTreeMap<String, Vec<u8>> {
        match surface {
            Surface::Controller => &mut self.controller_static,
            Surface::Guest => &mut self.guest_static,
        }
    }

    pub(crate) fn storage_classes_mut(&mut self) -> &mut BTreeMap<String, Vec<u8>> {
        &mut self.storage_classes
    }

    pub(crate) fn volume_snapshot_classes_mut(&mut self) -> &mut BTreeMap<String, Vec<u8>> {
        &mut self.volume_snapshot_classes
    }

    /// Document a patch on `surface` named `name` refers to
    ///
    /// The primary document wins over static documents; guest patches can
    /// also reach storage and snapshot classes.
    pub(crate) fn patch_target_mut(&mut self, surface: Surface, name: &str) -> Option<&mut Vec<u8>> {
        if name == surface.primary_name() {
            return match surface {
                Surface::Controller => self.controller.as_mut(),
                Surface::Guest => self.node.as_mut(),
            };
        }

        match surface {
            Surface::Controller => self.controller_static.get_mut(name),
            Surface::Guest => {
                if self.guest_static.contains_key(name) {
                    self.guest_static.get_mut(name)
                } else if self.storage_classes.contains_key(name) {
                    self.storage_classes.get_mut(name)
                } else {
                    self.volume_snapshot_classes.get_mut(name)
                }
            }
        }
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Write the bundle under `root`, canonicalizing every document
    pub fn save(&self, root: &Path) -> Result<()> {
        info!("Saving generated assets to {}", root.display());
        std::fs::create_dir_all(root)?;

        if let Some(data) = &self.controller {
            write_document(root, CONTROLLER_ASSET_NAME, data)?;
        }
        if let Some(data) = &self.node {
            write_document(root, NODE_ASSET_NAME, data)?;
        }

        for (dir, documents) in self.static_dirs() {
            if documents.is_empty() {
                continue;
            }
            let dir_path = root.join(dir);
            std::fs::create_dir_all(&dir_path)?;
            for (name, data) in documents {
                write_document(&dir_path, name, data)?;
            }
        }

        let index = serde_yaml::to_string(&self.index())?;
        std::fs::write(root.join(INDEX_FILE_NAME), index)?;

        info!(
            "Saved {} static documents",
            self.static_dirs().iter().map(|(_, d)| d.len()).sum::<usize>()
        );
        Ok(())
    }

    /// Read a bundle written by [`GeneratedAssets::save`]
    pub fn load(root: &Path) -> Result<Self> {
        info!("Loading generated assets from {}", root.display());

        let index_data = std::fs::read(root.join(INDEX_FILE_NAME))?;
        let index: BundleIndex = serde_yaml::from_slice(&index_data)?;

        let mut assets = GeneratedAssets::default();
        if let Some(name) = &index.controller {
            assets.controller = Some(read_document(root, name)?);
        }
        if let Some(name) = &index.node {
            assets.node = Some(read_document(root, name)?);
        }

        let sections = [
            (CONTROLLER_STATIC_DIR, &index.controller_static_assets, &mut assets.controller_static),
            (GUEST_STATIC_DIR, &index.guest_static_assets, &mut assets.guest_static),
            (STORAGE_CLASS_DIR, &index.storage_class_assets, &mut assets.storage_classes),
            (
                VOLUME_SNAPSHOT_CLASS_DIR,
                &index.volume_snapshot_class_assets,
                &mut assets.volume_snapshot_classes,
            ),
        ];
        for (dir, names, documents) in sections {
            for name in names {
                documents.insert(name.clone(), read_document(&root.join(dir), name)?);
            }
        }

        Ok(assets)
    }

    fn static_dirs(&self) -> [(&'static str, &BTreeMap<String, Vec<u8>>); 4] {
        [
            (CONTROLLER_STATIC_DIR, &self.controller_static),
            (GUEST_STATIC_DIR, &self.guest_static),
            (STORAGE_CLASS_DIR, &self.storage_classes),
            (VOLUME_SNAPSHOT_CLASS_DIR, &self.volume_snapshot_classes),
        ]
    }
}

fn sanitize_map(documents: &BTreeMap<String, Vec<u8>>) -> Result<BTreeMap<String, Vec<u8>>> {
    documents
        .iter()
        .map(|(name, data)| Ok((name.clone(), sanitize(data)?)))
        .collect()
}

/// Reject names that would leave the bundle directory
fn check_file_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(Error::Configuration(format!(
            "Invalid bundle document name: {:?}",
            name
        )));
    }
    Ok(())
}

fn write_document(dir: &Path, name: &str, data: &[u8]) -> Result<()> {
    check_file_name(name)?;
    let sanitized = sanitize(data).map_err(|e| Error::parse(name, e))?;
    debug!("Writing {}", dir.join(name).display());
    std::fs::write(dir.join(name), sanitized)?;
    Ok(())
}

fn read_document(dir: &Path, name: &str) -> Result<Vec<u8>> {
    check_file_name(name)?;
    Ok(std::fs::read(dir.join(name))?)
}

// =============================================================================
// Bundle Index
// =============================================================================

/// Contents of `manifest.yaml`; every list is sorted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleIndex {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default)]
    pub controller_static_assets: Vec<String>,
    #[serde(default)]
    pub guest_static_assets: Vec<String>,
    #[serde(default)]
    pub storage_class_assets: Vec<String>,
    #[serde(default)]
    pub volume_snapshot_class_assets: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn test_bundle() -> GeneratedAssets {
        let mut assets = GeneratedAssets::default();
        assets.set_primary(
            Surface::Controller,
            b"kind: Deployment\napiVersion: apps/v1\nmetadata: {name: controller}\n".to_vec(),
        );
        assets.set_primary(Surface::Guest, b"kind: DaemonSet\napiVersion: apps/v1\n".to_vec());
        assets
            .static_assets_mut(Surface::Controller)
            .insert("controller_sa.yaml".into(), b"kind: ServiceAccount\n".to_vec());
        assets
            .static_assets_mut(Surface::Controller)
            .insert("attacher_role.yaml".into(), b"kind: ClusterRole\n".to_vec());
        assets
            .static_assets_mut(Surface::Guest)
            .insert("csidriver.yaml".into(), b"kind: CSIDriver\n".to_vec());
        assets
            .storage_classes_mut()
            .insert("storageclass_gp3.yaml".into(), b"kind: StorageClass\n".to_vec());
        assets
            .volume_snapshot_classes_mut()
            .insert("volumesnapshotclass.yaml".into(), b"kind: VolumeSnapshotClass\n".to_vec());
        assets
    }

    #[test]
    fn test_index_is_sorted() {
        let index = test_bundle().index();
        assert_eq!(index.controller.as_deref(), Some("controller.yaml"));
        assert_eq!(index.node.as_deref(), Some("node.yaml"));
        assert_eq!(
            index.controller_static_assets,
            vec!["attacher_role.yaml", "controller_sa.yaml"]
        );
        assert_eq!(index.volume_snapshot_class_assets, vec!["volumesnapshotclass.yaml"]);
    }

    #[test]
    fn test_save_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let bundle = test_bundle();

        bundle.save(tmp.path()).unwrap();
        let loaded = GeneratedAssets::load(tmp.path()).unwrap();

        assert_eq!(loaded.index(), bundle.index());
        assert_eq!(loaded, bundle.sanitized().unwrap());
        assert!(tmp.path().join("controller/attacher_role.yaml").is_file());
        assert!(tmp.path().join("storageclasses/storageclass_gp3.yaml").is_file());
    }

    #[test]
    fn test_save_without_guest() {
        let tmp = TempDir::new().unwrap();
        let mut bundle = GeneratedAssets::default();
        bundle.set_primary(Surface::Controller, b"kind: Deployment\n".to_vec());

        bundle.save(tmp.path()).unwrap();
        assert!(!tmp.path().join("node.yaml").exists());
        assert!(!tmp.path().join("guest").exists());

        let loaded = GeneratedAssets::load(tmp.path()).unwrap();
        assert!(loaded.node().is_none());
        assert_eq!(loaded.controller(), Some(b"kind: Deployment\n".as_slice()));
    }

    #[test]
    fn test_load_rejects_escaping_names() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join(INDEX_FILE_NAME),
            "controllerStaticAssets: [\"../../etc/passwd\"]\n",
        )
        .unwrap();

        assert_matches!(GeneratedAssets::load(tmp.path()), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_patch_target_lookup() {
        let mut bundle = test_bundle();

        assert!(bundle.patch_target_mut(Surface::Controller, "controller.yaml").is_some());
        assert!(bundle.patch_target_mut(Surface::Controller, "controller_sa.yaml").is_some());
        assert!(bundle.patch_target_mut(Surface::Controller, "csidriver.yaml").is_none());
        assert!(bundle.patch_target_mut(Surface::Guest, "storageclass_gp3.yaml").is_some());
        assert!(bundle.patch_target_mut(Surface::Guest, "node.yaml").is_some());
        assert!(bundle.patch_target_mut(Surface::Guest, "missing.yaml").is_none());
    }
}
