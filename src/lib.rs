//! CSI Manifest Generator
//!
//! Composes the Kubernetes manifests of a CSI driver deployment from a
//! library of YAML templates: a base workload per surface, a driver-specific
//! template, flavour patches, reusable sidecars, static documents and
//! targeted patches.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐     ┌──────────────────────┐
//! │   GeneratorConfig    │     │    RuntimeConfig     │
//! │ (per driver, static) │     │ (flavour, namespace) │
//! └──────────┬───────────┘     └──────────┬───────────┘
//!            └─────────────┬──────────────┘
//!                          ▼
//!              ┌───────────────────────┐      ┌─────────────────┐
//!              │    AssetGenerator     │◄─────│  TemplateStore  │
//!              │  replace → merge →    │      │ (memory / disk) │
//!              │  patch, port plan     │      └─────────────────┘
//!              └───────────┬───────────┘
//!                          ▼
//!              ┌───────────────────────┐
//!              │    GeneratedAssets    │──► sanitize ──► save / load
//!              └───────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`config`]: Composition model, flavours and stock sidecars
//! - [`drivers`]: Built-in driver definitions
//! - [`generator`]: Generation pipeline and metrics port allocation
//! - [`template`]: Token substitution, overlay merge and point patches
//! - [`store`]: Template sources
//! - [`bundle`]: Generated documents, canonicalization and persistence
//! - [`error`]: Error types and handling

pub mod bundle;
pub mod config;
pub mod drivers;
pub mod error;
pub mod generator;
pub mod store;
pub mod template;

// Re-export commonly used types
pub use bundle::{sanitize, sanitize_file, BundleIndex, GeneratedAssets, Surface};

pub use config::{
    Asset, AssetPatch, ClusterFlavour, ControlPlaneConfig, FlavourSet, GeneratorConfig,
    GuestConfig, MetricsPort, RuntimeConfig, SidecarConfig,
};

pub use error::{Error, ErrorAction, Result};

pub use generator::{AssetGenerator, PortAllocator, PortPair, PortPlan};

pub use store::{DirectoryStore, MemoryStore, TemplateStore};

pub use template::{overlay_merge, point_patch, Document, Replacements};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
