//! CSI Manifest Generator
//!
//! Command line front end: generate a bundle for a driver definition, dump
//! the controller manifests into a directory, or canonicalize existing YAML
//! files in place.

use anyhow::{bail, Context};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{debug, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use csi_manifest_gen::{
    bundle, drivers, AssetGenerator, ClusterFlavour, DirectoryStore, GeneratedAssets,
    GeneratorConfig, RuntimeConfig,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Composable manifest generator for CSI driver deployments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate the full bundle and save it
    Generate {
        #[command(flatten)]
        driver: DriverArgs,

        /// Bundle output directory
        #[arg(long, short)]
        output: PathBuf,
    },

    /// Write the controller Deployment and its static documents
    Dump {
        #[command(flatten)]
        driver: DriverArgs,

        /// Output directory
        #[arg(long, short, default_value = ".")]
        output: PathBuf,
    },

    /// Canonicalize YAML files in place
    Sanitize {
        /// Files or glob patterns
        #[arg(required = true)]
        files: Vec<String>,
    },
}

#[derive(ClapArgs, Debug)]
struct DriverArgs {
    /// Driver composition model (YAML)
    #[arg(long, conflicts_with = "driver", required_unless_present = "driver")]
    config: Option<PathBuf>,

    /// Built-in driver definition
    #[arg(long, env = "CSI_DRIVER")]
    driver: Option<String>,

    /// Template library root
    #[arg(long, env = "ASSETS_DIR", default_value = "assets")]
    assets: PathBuf,

    /// Cluster flavour (standalone, hypershift)
    #[arg(long, env = "CLUSTER_FLAVOUR", default_value = "standalone")]
    flavour: ClusterFlavour,

    /// Namespace of the generated objects
    #[arg(long, env = "NAMESPACE", default_value = "openshift-cluster-csi-drivers")]
    namespace: String,

    /// Extra substitution, replaces ${KEY} with VALUE
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    replacements: Vec<(String, String)>,
}

fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((format!("${{{}}}", key), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {}", s)),
    }
}

// =============================================================================
// Main
// =============================================================================

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    debug!("{} {}", csi_manifest_gen::NAME, csi_manifest_gen::VERSION);

    match args.command {
        Command::Generate { driver, output } => {
            let assets = generate(&driver)?;
            assets
                .save(&output)
                .with_context(|| format!("Failed to save bundle to {}", output.display()))?;
            info!("Bundle written to {}", output.display());
        }
        Command::Dump { driver, output } => {
            let assets = generate(&driver)?;
            dump_controller(&assets, &output)?;
        }
        Command::Sanitize { files } => sanitize_files(&files)?,
    }

    Ok(())
}

fn load_config(args: &DriverArgs) -> anyhow::Result<GeneratorConfig> {
    if let Some(path) = &args.config {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read driver config {}", path.display()))?;
        return GeneratorConfig::from_yaml(&data)
            .with_context(|| format!("Invalid driver config {}", path.display()));
    }

    let name = args.driver.as_deref().unwrap_or_default();
    match drivers::by_name(name) {
        Some(config) => Ok(config),
        None => bail!(
            "Unknown driver {}, available: {}",
            name,
            drivers::names().join(", ")
        ),
    }
}

fn generate(args: &DriverArgs) -> anyhow::Result<GeneratedAssets> {
    let config = load_config(args)?;

    let runtime = args.replacements.iter().fold(
        RuntimeConfig::new(args.flavour).with_namespace(&args.namespace),
        |runtime, (key, value)| runtime.with_replacement(key, value),
    );

    info!("  Driver: {}", config.driver_name);
    info!("  Flavour: {}", args.flavour);
    info!("  Namespace: {}", args.namespace);
    info!("  Assets: {}", args.assets.display());

    let generator = AssetGenerator::new(config, runtime, DirectoryStore::new(&args.assets));
    generator.generate().context("Asset generation failed")
}

// =============================================================================
// Dump
// =============================================================================

fn dump_controller(assets: &GeneratedAssets, output: &Path) -> anyhow::Result<()> {
    let Some(controller) = assets.controller() else {
        bail!("Driver has no controller surface");
    };

    std::fs::create_dir_all(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let documents = std::iter::once(("controller.yaml", controller)).chain(
        assets
            .controller_static_assets()
            .iter()
            .map(|(name, data)| (name.as_str(), data.as_slice())),
    );

    for (name, data) in documents {
        let path = output.join(name);
        std::fs::write(&path, bundle::sanitize(data)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Wrote {}", path.display());
    }

    Ok(())
}

// =============================================================================
// Sanitize
// =============================================================================

fn sanitize_files(patterns: &[String]) -> anyhow::Result<()> {
    let mut changed = 0;
    let mut total = 0;

    for pattern in patterns {
        let paths = glob::glob(pattern).with_context(|| format!("Invalid pattern {}", pattern))?;

        let mut matched = false;
        for entry in paths {
            let path = entry?;
            matched = true;
            total += 1;
            if bundle::sanitize_file(&path)
                .with_context(|| format!("Failed to sanitize {}", path.display()))?
            {
                changed += 1;
            }
        }

        if !matched {
            bail!("No files match {}", pattern);
        }
    }

    info!("Sanitized {} files, {} changed", total, changed);
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("DRIVER_IMAGE=quay.io/ebs:4.16").unwrap(),
            ("${DRIVER_IMAGE}".to_string(), "quay.io/ebs:4.16".to_string())
        );
        assert_eq!(
            parse_key_value("ARGS=a=b").unwrap(),
            ("${ARGS}".to_string(), "a=b".to_string())
        );
        assert!(parse_key_value("=value").is_err());
        assert!(parse_key_value("missing").is_err());
    }

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Args::command().debug_assert();

        let args = Args::try_parse_from([
            "csi-manifest-gen",
            "generate",
            "--driver",
            "aws-ebs",
            "--flavour",
            "hypershift",
            "--set",
            "LOG_LEVEL=2",
            "--output",
            "out",
        ])
        .unwrap();

        match args.command {
            Command::Generate { driver, output } => {
                assert_eq!(driver.flavour, ClusterFlavour::HyperShift);
                assert_eq!(driver.replacements.len(), 1);
                assert_eq!(output, PathBuf::from("out"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
