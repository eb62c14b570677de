//! Process-wide runtime configuration.
//!
//! Read once from the environment on first use:
//!
//! - `NESTEDTENSOR_PACKED`: set to `0`/`false`/`off` to disable the packed
//!   single-buffer fast paths of `matmul` and `addmm` (default on).
//! - `NESTEDTENSOR_PARALLEL`: set to `0`/`false`/`off` to keep leaf-wise
//!   loops on the calling thread even when the `parallel` feature is
//!   compiled in (default on).

use std::sync::OnceLock;

use faer::Par;

/// Runtime switches for strategy selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NestedConfig {
    /// Allow the packed single-buffer code paths.
    pub packed_fast_paths: bool,
    /// Run leaf-wise loops on the rayon pool (`parallel` feature only).
    pub parallel_leaves: bool,
}

impl Default for NestedConfig {
    fn default() -> Self {
        Self {
            packed_fast_paths: true,
            parallel_leaves: true,
        }
    }
}

impl NestedConfig {
    fn from_env() -> Self {
        Self {
            packed_fast_paths: env_flag("NESTEDTENSOR_PACKED").unwrap_or(true),
            parallel_leaves: env_flag("NESTEDTENSOR_PARALLEL").unwrap_or(true),
        }
    }

    /// Whether leaf-wise loops should fan out over rayon.
    pub fn use_parallel_leaves(&self) -> bool {
        cfg!(feature = "parallel") && self.parallel_leaves
    }

    /// faer parallelism for single large gemms.
    pub(crate) fn gemm_par(&self) -> Par {
        if self.use_parallel_leaves() {
            Par::rayon(0)
        } else {
            Par::Seq
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| !matches!(v.as_str(), "0" | "false" | "False" | "off" | "OFF"))
}

static CONFIG: OnceLock<NestedConfig> = OnceLock::new();

/// Returns the lazily initialised configuration.
pub fn config() -> &'static NestedConfig {
    CONFIG.get_or_init(NestedConfig::from_env)
}

/// Installs `cfg` if no configuration has been read yet.
///
/// Returns the configuration in effect, which is the earlier one if
/// [`config`] or `configure` already ran.
pub fn configure(cfg: NestedConfig) -> &'static NestedConfig {
    CONFIG.get_or_init(|| cfg)
}
