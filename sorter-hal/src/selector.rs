//! Backend selection at startup (and on reset)

use crate::backend::HardwareBackend;
use crate::real::RealBackend;
use crate::simulated::SimulatedBackend;
use sorter_core::config::{BackendPreference, SorterConfig};
use sorter_core::{HardwareCapabilities, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of backend selection
#[derive(Clone)]
pub struct SelectedBackend {
    pub backend: Arc<dyn HardwareBackend>,
    pub capabilities: HardwareCapabilities,
    /// Why the real backend was not used, if it was wanted
    pub fallback_reason: Option<String>,
}

impl SelectedBackend {
    pub fn new(backend: Arc<dyn HardwareBackend>) -> Self {
        Self {
            capabilities: backend.capabilities(),
            backend,
            fallback_reason: None,
        }
    }
}

impl std::fmt::Debug for SelectedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectedBackend")
            .field("capabilities", &self.capabilities)
            .field("fallback_reason", &self.fallback_reason)
            .finish()
    }
}

/// Something that can (re)build the hardware backend
pub trait BackendProvider: Send + Sync {
    fn select(&self, config: &SorterConfig) -> Result<SelectedBackend>;
}

impl<F> BackendProvider for F
where
    F: Fn(&SorterConfig) -> Result<SelectedBackend> + Send + Sync,
{
    fn select(&self, config: &SorterConfig) -> Result<SelectedBackend> {
        self(config)
    }
}

/// Pick the backend once. Real initialization failures fall back to
/// simulation with the reason logged.
pub fn select_backend(config: &SorterConfig) -> Result<SelectedBackend> {
    let attempt = match config.hardware.backend {
        BackendPreference::Simulated => None,
        BackendPreference::Real => Some(RealBackend::initialize(config)),
        BackendPreference::Auto => {
            if config.hardware.gpio_root.join("export").exists() {
                Some(RealBackend::initialize(config))
            } else {
                info!(
                    "No GPIO controller at {}, using simulated hardware",
                    config.hardware.gpio_root.display()
                );
                None
            }
        }
    };

    let fallback_reason = match attempt {
        Some(Ok(real)) => return Ok(SelectedBackend::new(Arc::new(real))),
        Some(Err(e)) => {
            warn!("Real hardware initialization failed, falling back to simulation: {}", e);
            Some(e.to_string())
        }
        None => None,
    };

    let simulated = SimulatedBackend::new(config)?;
    Ok(SelectedBackend {
        backend: Arc::new(simulated),
        capabilities: HardwareCapabilities::Simulated,
        fallback_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_preference() {
        let mut config = SorterConfig::default();
        config.hardware.backend = BackendPreference::Simulated;
        let selected = select_backend(&config).unwrap();
        assert_eq!(selected.capabilities, HardwareCapabilities::Simulated);
        assert!(selected.fallback_reason.is_none());
    }

    #[test]
    fn test_real_failure_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SorterConfig::default();
        config.hardware.backend = BackendPreference::Real;
        config.hardware.gpio_root = dir.path().join("missing");
        let selected = select_backend(&config).unwrap();
        assert_eq!(selected.capabilities, HardwareCapabilities::Simulated);
        assert_eq!(selected.backend.capabilities(), HardwareCapabilities::Simulated);
        assert!(selected.fallback_reason.is_some());
    }

    #[test]
    fn test_auto_without_gpio_is_simulated() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SorterConfig::default();
        config.hardware.gpio_root = dir.path().to_path_buf();
        let selected = select_backend(&config).unwrap();
        assert_eq!(selected.capabilities, HardwareCapabilities::Simulated);
        assert!(selected.fallback_reason.is_none());
    }

    #[test]
    fn test_closure_provider() {
        let provider = |config: &SorterConfig| -> Result<SelectedBackend> {
            Ok(SelectedBackend::new(Arc::new(SimulatedBackend::new(config)?)))
        };
        let selected = provider.select(&SorterConfig::default()).unwrap();
        assert_eq!(selected.capabilities, HardwareCapabilities::Simulated);
    }
}
