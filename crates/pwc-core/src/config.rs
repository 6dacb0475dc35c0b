/// Paging-structure cache configuration.
///
/// Capacities are fixed once the caches are built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwcConfig {
    pub enabled: bool,
    pub pml4_entries: usize,
    pub pdp_entries: usize,
    pub pde_entries: usize,
}

impl Default for PwcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pml4_entries: 2,
            pdp_entries: 4,
            pde_entries: 32,
        }
    }
}

impl PwcConfig {
    pub const ENABLE_VAR: &'static str = "PWC_ENABLE";
    pub const PML4_VAR: &'static str = "PWC_PML4_ENTRIES";
    pub const PDP_VAR: &'static str = "PWC_PDP_ENTRIES";
    pub const PDE_VAR: &'static str = "PWC_PDE_ENTRIES";

    /// Build configuration from environment.
    ///
    /// `PWC_ENABLE=0|off|false|no` disables the caches; the `*_ENTRIES`
    /// variables override capacities. Anything unparsable is ignored with a
    /// warning.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = var(Self::ENABLE_VAR) {
            let normalized = raw.trim().to_ascii_lowercase();
            if matches!(normalized.as_str(), "0" | "off" | "false" | "no") {
                config.enabled = false;
            } else if matches!(normalized.as_str(), "" | "1" | "on" | "true" | "yes") {
                config.enabled = true;
            } else {
                log::warn!(
                    "Unknown {} value {:?}; keeping caches enabled",
                    Self::ENABLE_VAR,
                    raw
                );
            }
        }

        for (name, slot) in [
            (Self::PML4_VAR, &mut config.pml4_entries),
            (Self::PDP_VAR, &mut config.pdp_entries),
            (Self::PDE_VAR, &mut config.pde_entries),
        ] {
            let Some(raw) = var(name) else {
                continue;
            };
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => *slot = n,
                _ => log::warn!(
                    "Invalid {} value {:?}; using default of {} entries",
                    name,
                    raw,
                    slot
                ),
            }
        }

        config
    }
}
