use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for a single prepare/train/publish run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Backend-agnostic model reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Backend identifier (e.g., "distilbert")
    pub backend: String,
    /// Base checkpoint on the registry (e.g., "distilbert-base-uncased")
    pub checkpoint: String,
}

/// Requested compute device. `Auto` picks the best device the backend supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeDevice {
    #[default]
    Auto,
    Cpu,
    Cuda,
    Metal,
}

impl ComputeDevice {
    /// Resolve against the devices a backend can actually run on.
    ///
    /// Unavailable accelerators degrade to the CPU instead of failing.
    #[must_use]
    pub fn resolve(self, supported: &[Self]) -> Self {
        match self {
            Self::Auto => [Self::Cuda, Self::Metal]
                .into_iter()
                .find(|d| supported.contains(d))
                .unwrap_or(Self::Cpu),
            requested if supported.contains(&requested) => requested,
            requested => {
                tracing::info!(?requested, "requested device unavailable, falling back to cpu");
                Self::Cpu
            }
        }
    }
}

impl std::fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Auto => "auto",
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
            Self::Metal => "metal",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }

    #[test]
    fn test_device_falls_back_to_cpu() {
        let supported = [ComputeDevice::Cpu];
        assert_eq!(ComputeDevice::Cuda.resolve(&supported), ComputeDevice::Cpu);
        assert_eq!(ComputeDevice::Metal.resolve(&supported), ComputeDevice::Cpu);
        assert_eq!(ComputeDevice::Auto.resolve(&supported), ComputeDevice::Cpu);
    }

    #[test]
    fn test_device_keeps_supported_request() {
        let supported = [ComputeDevice::Cpu, ComputeDevice::Cuda];
        assert_eq!(ComputeDevice::Cuda.resolve(&supported), ComputeDevice::Cuda);
        assert_eq!(ComputeDevice::Auto.resolve(&supported), ComputeDevice::Cuda);
    }
}
