//! Pending-restart detection.
//!
//! No single marker is authoritative across OS component servicing, update
//! installation and third-party management agents, so the probe ORs every
//! signal together. A query that fails counts as "not pending". Results are
//! recomputed on every call.

use tracing::debug;

use crate::host::{HostInspect, PendingMarker};

/// A single reboot signal and its reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalReading {
    /// Human-readable signal name.
    pub signal: &'static str,
    /// Whether the signal reported a pending restart.
    pub pending: bool,
    /// Query failure that was folded into `pending = false`.
    pub error: Option<String>,
}

/// Decides whether a restart is required before further changes are safe.
pub struct RebootProbe<'a, I: ?Sized> {
    host: &'a I,
    consult_agent: bool,
}

impl<'a, I: HostInspect + ?Sized> RebootProbe<'a, I> {
    /// Probe that consults every signal, including the management agent.
    pub fn new(host: &'a I) -> Self {
        Self {
            host,
            consult_agent: true,
        }
    }

    /// Enable or disable the management-agent query.
    #[must_use]
    pub fn with_management_agent(mut self, consult: bool) -> Self {
        self.consult_agent = consult;
        self
    }

    /// Whether any signal reports a pending restart.
    #[must_use]
    pub fn is_reboot_pending(&self) -> bool {
        let markers = PendingMarker::ALL
            .into_iter()
            .any(|marker| self.marker(marker));
        markers || (self.consult_agent && self.agent())
    }

    /// Per-signal readings, for diagnostics.
    #[must_use]
    pub fn signals(&self) -> Vec<SignalReading> {
        let mut readings: Vec<SignalReading> = PendingMarker::ALL
            .into_iter()
            .map(|marker| reading(marker.label(), self.host.marker_present(marker)))
            .collect();

        if self.consult_agent {
            readings.push(reading(
                "Management agent",
                self.host.management_agent_reboot_pending(),
            ));
        }
        readings
    }

    fn marker(&self, marker: PendingMarker) -> bool {
        match self.host.marker_present(marker) {
            Ok(present) => present,
            Err(e) => {
                debug!(marker = ?marker, error = %e, "Reboot marker query failed, treating as absent");
                false
            }
        }
    }

    fn agent(&self) -> bool {
        match self.host.management_agent_reboot_pending() {
            Ok(pending) => pending,
            Err(e) => {
                debug!(error = %e, "Management agent unavailable, treating as not pending");
                false
            }
        }
    }
}

fn reading<E: std::fmt::Display>(signal: &'static str, result: Result<bool, E>) -> SignalReading {
    match result {
        Ok(pending) => SignalReading {
            signal,
            pending,
            error: None,
        },
        Err(e) => SignalReading {
            signal,
            pending: false,
            error: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{FeatureState, HostError};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Signals {
        markers: HashSet<PendingMarker>,
        failing_markers: HashSet<PendingMarker>,
        agent: Option<bool>,
        agent_calls: AtomicUsize,
    }

    impl HostInspect for Signals {
        fn marker_present(&self, marker: PendingMarker) -> Result<bool, HostError> {
            if self.failing_markers.contains(&marker) {
                return Err(HostError::Unsupported("test".into()));
            }
            Ok(self.markers.contains(&marker))
        }

        fn management_agent_reboot_pending(&self) -> Result<bool, HostError> {
            self.agent_calls.fetch_add(1, Ordering::SeqCst);
            self.agent
                .ok_or_else(|| HostError::Unsupported("no agent".into()))
        }

        fn feature_state(&self, _feature: &str) -> Result<FeatureState, HostError> {
            Ok(FeatureState::Disabled)
        }

        fn service_running(&self, _service: &str) -> Result<bool, HostError> {
            Ok(false)
        }
    }

    #[test]
    fn test_clean_host_is_not_pending() {
        let host = Signals {
            agent: Some(false),
            ..Signals::default()
        };
        assert!(!RebootProbe::new(&host).is_reboot_pending());
    }

    #[test]
    fn test_any_single_marker_is_sufficient() {
        for marker in PendingMarker::ALL {
            let host = Signals {
                markers: HashSet::from([marker]),
                agent: Some(false),
                ..Signals::default()
            };
            assert!(
                RebootProbe::new(&host).is_reboot_pending(),
                "{marker:?} alone should report pending"
            );
        }
    }

    #[test]
    fn test_agent_alone_is_sufficient() {
        let host = Signals {
            agent: Some(true),
            ..Signals::default()
        };
        assert!(RebootProbe::new(&host).is_reboot_pending());
    }

    #[test]
    fn test_marker_wins_even_when_others_fail() {
        let host = Signals {
            markers: HashSet::from([PendingMarker::PendingFileRenames]),
            failing_markers: HashSet::from([
                PendingMarker::ComponentServicing,
                PendingMarker::UpdateRebootRequired,
            ]),
            agent: None,
            ..Signals::default()
        };
        assert!(RebootProbe::new(&host).is_reboot_pending());
    }

    #[test]
    fn test_failures_are_treated_as_not_pending() {
        let host = Signals {
            failing_markers: PendingMarker::ALL.into_iter().collect(),
            agent: None,
            ..Signals::default()
        };
        assert!(!RebootProbe::new(&host).is_reboot_pending());
    }

    #[test]
    fn test_agent_can_be_disabled() {
        let host = Signals {
            agent: Some(true),
            ..Signals::default()
        };
        let probe = RebootProbe::new(&host).with_management_agent(false);
        assert!(!probe.is_reboot_pending());
        assert_eq!(host.agent_calls.load(Ordering::SeqCst), 0);
        assert_eq!(probe.signals().len(), PendingMarker::ALL.len());
    }

    #[test]
    fn test_signals_report_errors() {
        let host = Signals {
            markers: HashSet::from([PendingMarker::ComponentServicing]),
            agent: None,
            ..Signals::default()
        };
        let readings = RebootProbe::new(&host).signals();
        assert_eq!(readings.len(), 4);
        assert!(readings[0].pending);
        let agent = readings.last().unwrap();
        assert!(!agent.pending);
        assert!(agent.error.as_deref().unwrap().contains("no agent"));
    }
}
