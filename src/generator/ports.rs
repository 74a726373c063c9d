//! Port Allocator
//!
//! Metrics endpoints of the controller pod all share one network namespace,
//! so every local and exposed port number must be unique across the pod.
//! Driver ports are declared explicitly in [`MetricsPort`]; sidecars draw
//! sequential pairs from two counters seeded by the control-plane config.
//!
//! Visiting order is fixed: proxy-injected driver ports, then metrics-bearing
//! sidecars in declared order, then every driver port for the Service. A
//! sidecar excluded from the requested flavour is skipped entirely and does
//! not advance the counters, so the ports that follow it shift down instead
//! of leaving a hole.

use crate::config::{ClusterFlavour, ControlPlaneConfig, MetricsPort};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

// =============================================================================
// Port Pairs
// =============================================================================

/// Local (in-pod) and exposed (Service) port of one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortPair {
    pub local: u16,
    pub exposed: u16,
}

impl PortPair {
    pub fn new(local: u16, exposed: u16) -> Self {
        Self { local, exposed }
    }
}

/// Two monotonically increasing port counters
///
/// Counters are kept wider than a port number so that 65535 itself can still
/// be handed out; only a pair past it fails.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    next_local: u32,
    next_exposed: u32,
}

impl PortAllocator {
    pub fn new(local_start: u16, exposed_start: u16) -> Self {
        Self {
            next_local: local_start.into(),
            next_exposed: exposed_start.into(),
        }
    }

    /// Seed from a control-plane config
    pub fn for_controller(config: &ControlPlaneConfig) -> Self {
        Self::new(
            config.sidecar_local_metrics_port_start,
            config.sidecar_exposed_metrics_port_start,
        )
    }

    /// Hand out the next pair; both counters advance by one
    pub fn allocate(&mut self) -> Result<PortPair> {
        let local = u16::try_from(self.next_local).map_err(|_| overflow())?;
        let exposed = u16::try_from(self.next_exposed).map_err(|_| overflow())?;
        self.next_local += 1;
        self.next_exposed += 1;
        Ok(PortPair::new(local, exposed))
    }
}

fn overflow() -> Error {
    Error::Configuration("Sidecar metrics port range exceeds 65535".to_string())
}

// =============================================================================
// Port Plan
// =============================================================================

/// A named metrics endpoint with its ports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsEndpoint {
    pub name: String,
    pub ports: PortPair,
}

impl MetricsEndpoint {
    fn driver(port: &MetricsPort) -> Self {
        Self {
            name: port.name.clone(),
            ports: PortPair::new(port.local_port, port.exposed_port),
        }
    }
}

/// Port assignment for one controller generation run
#[derive(Debug, Clone, Default)]
pub struct PortPlan {
    proxies: Vec<MetricsEndpoint>,
    sidecars: Vec<MetricsEndpoint>,
    drivers: Vec<MetricsEndpoint>,
    by_sidecar: BTreeMap<usize, PortPair>,
}

impl PortPlan {
    /// Assign ports for `flavour`
    ///
    /// Fails when two endpoints end up sharing a port number.
    pub fn build(config: &ControlPlaneConfig, flavour: ClusterFlavour) -> Result<Self> {
        let mut plan = PortPlan::default();
        let mut allocator = PortAllocator::for_controller(config);

        plan.proxies = config
            .metrics_ports
            .iter()
            .filter(|p| p.inject_proxy)
            .map(MetricsEndpoint::driver)
            .collect();

        for (index, sidecar) in config.sidecars.iter().enumerate() {
            if !sidecar.has_metrics_port {
                continue;
            }
            if !sidecar.is_included(flavour) {
                debug!(
                    "Sidecar {} excluded for {}, no metrics port reserved",
                    sidecar.template_name, flavour
                );
                continue;
            }

            let ports = allocator.allocate()?;
            plan.by_sidecar.insert(index, ports);
            plan.sidecars.push(MetricsEndpoint {
                name: sidecar.metrics_port_name.clone(),
                ports,
            });
        }

        plan.drivers = config
            .metrics_ports
            .iter()
            .map(MetricsEndpoint::driver)
            .collect();

        plan.check_unique()?;
        Ok(plan)
    }

    fn check_unique(&self) -> Result<()> {
        let mut taken = BTreeSet::new();
        let mut names = BTreeSet::new();

        for endpoint in self.sidecars.iter().chain(&self.drivers) {
            if !names.insert(endpoint.name.as_str()) {
                return Err(Error::Configuration(format!(
                    "Metrics port name {} is used twice",
                    endpoint.name
                )));
            }

            // A port may serve as both local and exposed port of one endpoint
            let own: BTreeSet<u16> = [endpoint.ports.local, endpoint.ports.exposed].into();
            for port in own {
                if !taken.insert(port) {
                    return Err(Error::Configuration(format!(
                        "Metrics port {} of {} collides with another endpoint",
                        port, endpoint.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Driver ports that need a proxy container, in declared order
    pub fn proxies(&self) -> &[MetricsEndpoint] {
        &self.proxies
    }

    /// Ports of the sidecar at `index` in the configured list
    pub fn sidecar_ports(&self, index: usize) -> Option<PortPair> {
        self.by_sidecar.get(&index).copied()
    }

    /// Endpoints exposed through the metrics Service: sidecars, then driver ports
    pub fn service_endpoints(&self) -> impl Iterator<Item = &MetricsEndpoint> {
        self.sidecars.iter().chain(&self.drivers)
    }

    /// Every local port in the pod, in visiting order
    pub fn local_ports(&self) -> Vec<u16> {
        self.proxies
            .iter()
            .chain(&self.sidecars)
            .map(|e| e.ports.local)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sidecars.is_empty() && self.drivers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FlavourSet, SidecarConfig};
    use assert_matches::assert_matches;

    fn metrics_sidecar(template: &str, port_name: &str) -> SidecarConfig {
        SidecarConfig::new(template).with_metrics_port(port_name)
    }

    fn controller(sidecars: Vec<SidecarConfig>) -> ControlPlaneConfig {
        ControlPlaneConfig {
            deployment_template_name: "overlays/test/controller.yaml".into(),
            metrics_ports: vec![MetricsPort {
                local_port: 8201,
                exposed_port: 9201,
                name: "driver-m".into(),
                inject_proxy: true,
            }],
            sidecar_local_metrics_port_start: 8202,
            sidecar_exposed_metrics_port_start: 9202,
            sidecars,
            static_assets: Vec::new(),
            patches: Vec::new(),
        }
    }

    #[test]
    fn test_allocator_advances_both_counters() {
        let mut allocator = PortAllocator::new(8202, 9202);
        assert_eq!(allocator.allocate().unwrap(), PortPair::new(8202, 9202));
        assert_eq!(allocator.allocate().unwrap(), PortPair::new(8203, 9203));
        assert_eq!(allocator.allocate().unwrap(), PortPair::new(8204, 9204));
    }

    #[test]
    fn test_allocator_hands_out_highest_port() {
        let mut allocator = PortAllocator::new(u16::MAX, u16::MAX);
        assert_eq!(allocator.allocate().unwrap(), PortPair::new(u16::MAX, u16::MAX));
        assert_matches!(allocator.allocate(), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_allocator_overflow_on_either_counter() {
        let mut allocator = PortAllocator::new(9000, u16::MAX);
        assert_eq!(allocator.allocate().unwrap(), PortPair::new(9000, u16::MAX));
        assert_matches!(allocator.allocate(), Err(Error::Configuration(_)));

        let mut allocator = PortAllocator::new(u16::MAX - 1, 9000);
        assert_eq!(allocator.allocate().unwrap(), PortPair::new(u16::MAX - 1, 9000));
        assert_eq!(allocator.allocate().unwrap(), PortPair::new(u16::MAX, 9001));
        assert_matches!(allocator.allocate(), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_last_sidecar_gets_highest_port() {
        let mut config = controller(vec![metrics_sidecar(
            "common/sidecars/provisioner.yaml",
            "provisioner-m",
        )]);
        config.sidecar_local_metrics_port_start = u16::MAX;
        config.sidecar_exposed_metrics_port_start = u16::MAX - 1;

        let plan = PortPlan::build(&config, ClusterFlavour::Standalone).unwrap();
        assert_eq!(plan.sidecar_ports(0), Some(PortPair::new(u16::MAX, u16::MAX - 1)));

        config.sidecars.push(metrics_sidecar("common/sidecars/attacher.yaml", "attacher-m"));
        assert_matches!(
            PortPlan::build(&config, ClusterFlavour::Standalone),
            Err(Error::Configuration(_))
        );
    }

    #[test]
    fn test_sidecars_in_declared_order() {
        let config = controller(vec![
            metrics_sidecar("common/sidecars/provisioner.yaml", "provisioner-m"),
            SidecarConfig::new("common/sidecars/livenessprobe.yaml"),
            metrics_sidecar("common/sidecars/attacher.yaml", "attacher-m"),
        ]);

        let plan = PortPlan::build(&config, ClusterFlavour::Standalone).unwrap();

        assert_eq!(plan.sidecar_ports(0), Some(PortPair::new(8202, 9202)));
        assert_eq!(plan.sidecar_ports(1), None);
        assert_eq!(plan.sidecar_ports(2), Some(PortPair::new(8203, 9203)));
        assert_eq!(plan.local_ports(), vec![8201, 8202, 8203]);

        let names: Vec<_> = plan.service_endpoints().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["provisioner-m", "attacher-m", "driver-m"]);
    }

    #[test]
    fn test_excluded_sidecar_reserves_nothing() {
        let config = controller(vec![
            metrics_sidecar("common/sidecars/provisioner.yaml", "provisioner-m"),
            metrics_sidecar("common/sidecars/snapshotter.yaml", "snapshotter-m")
                .for_flavours(FlavourSet::standalone()),
        ]);

        let hosted = PortPlan::build(&config, ClusterFlavour::HyperShift).unwrap();
        assert_eq!(hosted.local_ports(), vec![8201, 8202]);
        assert_eq!(hosted.sidecar_ports(1), None);

        let standalone = PortPlan::build(&config, ClusterFlavour::Standalone).unwrap();
        assert_eq!(standalone.local_ports(), vec![8201, 8202, 8203]);

        let unique: BTreeSet<_> = standalone.local_ports().into_iter().collect();
        assert_eq!(unique.len(), standalone.local_ports().len());
    }

    #[test]
    fn test_excluded_sidecar_shifts_later_ports() {
        let config = controller(vec![
            metrics_sidecar("common/sidecars/snapshotter.yaml", "snapshotter-m")
                .for_flavours(FlavourSet::standalone()),
            metrics_sidecar("common/sidecars/resizer.yaml", "resizer-m"),
        ]);

        let plan = PortPlan::build(&config, ClusterFlavour::HyperShift).unwrap();
        assert_eq!(plan.sidecar_ports(1), Some(PortPair::new(8202, 9202)));
    }

    #[test]
    fn test_collision_is_configuration_error() {
        let mut config = controller(vec![metrics_sidecar(
            "common/sidecars/provisioner.yaml",
            "provisioner-m",
        )]);
        config.sidecar_local_metrics_port_start = 8201;

        let err = PortPlan::build(&config, ClusterFlavour::Standalone).unwrap_err();
        assert_matches!(err, Error::Configuration(msg) if msg.contains("8201"));
    }

    #[test]
    fn test_duplicate_port_name_rejected() {
        let config = controller(vec![metrics_sidecar(
            "common/sidecars/provisioner.yaml",
            "driver-m",
        )]);

        assert_matches!(
            PortPlan::build(&config, ClusterFlavour::Standalone),
            Err(Error::Configuration(_))
        );
    }
}
