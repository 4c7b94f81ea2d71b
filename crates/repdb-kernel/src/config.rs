//! Engine configuration and the replication rule.
//!
//! The layout is fixed for the lifetime of an [`crate::Engine`]: sites are
//! numbered `1..=site_count`, variables `1..=variable_count`. Even-indexed
//! variables are stored at every site; odd-indexed variable `xi` is stored
//! only at site `(i mod site_count) + 1`.

use repdb_types::{SiteId, Value, VarId};
use serde::{Deserialize, Serialize};

use crate::KernelError;

/// Default number of sites.
pub const DEFAULT_SITE_COUNT: u32 = 10;

/// Default number of variables.
pub const DEFAULT_VARIABLE_COUNT: u32 = 20;

/// Default multiplier for initial values (`xi` starts at `10 * i`).
pub const DEFAULT_INITIAL_VALUE_FACTOR: Value = 10;

/// Configuration for an [`crate::Engine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of sites.
    pub site_count: u32,
    /// Number of variables.
    pub variable_count: u32,
    /// Initial committed value of `xi` is `i * initial_value_factor`.
    pub initial_value_factor: Value,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            site_count: DEFAULT_SITE_COUNT,
            variable_count: DEFAULT_VARIABLE_COUNT,
            initial_value_factor: DEFAULT_INITIAL_VALUE_FACTOR,
        }
    }
}

impl EngineConfig {
    /// Sets the number of sites.
    pub fn with_site_count(mut self, site_count: u32) -> Self {
        self.site_count = site_count;
        self
    }

    /// Sets the number of variables.
    pub fn with_variable_count(mut self, variable_count: u32) -> Self {
        self.variable_count = variable_count;
        self
    }

    /// Sets the initial value multiplier.
    pub fn with_initial_value_factor(mut self, factor: Value) -> Self {
        self.initial_value_factor = factor;
        self
    }

    /// Checks that the layout is usable.
    pub fn validate(&self) -> Result<(), KernelError> {
        if self.site_count == 0 {
            return Err(KernelError::InvalidConfig(
                "site_count must be at least 1".to_string(),
            ));
        }
        if self.variable_count == 0 {
            return Err(KernelError::InvalidConfig(
                "variable_count must be at least 1".to_string(),
            ));
        }
        if Value::from(self.variable_count)
            .checked_mul(self.initial_value_factor)
            .is_none()
        {
            return Err(KernelError::InvalidConfig(format!(
                "initial_value_factor {} overflows x{}",
                self.initial_value_factor, self.variable_count
            )));
        }
        Ok(())
    }

    pub fn contains_site(&self, site: SiteId) -> bool {
        (1..=self.site_count).contains(&site.as_u32())
    }

    pub fn contains_variable(&self, var: VarId) -> bool {
        (1..=self.variable_count).contains(&var.index())
    }

    /// All site ids in ascending order.
    pub fn site_ids(&self) -> impl Iterator<Item = SiteId> {
        (1..=self.site_count).map(SiteId::new)
    }

    /// All variable ids in ascending order.
    pub fn variable_ids(&self) -> impl Iterator<Item = VarId> {
        (1..=self.variable_count).map(VarId::new)
    }

    /// The single site storing an unreplicated variable.
    pub fn home_site(&self, var: VarId) -> SiteId {
        SiteId::new(var.index() % self.site_count + 1)
    }

    /// Sites storing `var`, in the order they are tried.
    pub fn sites_for(&self, var: VarId) -> Vec<SiteId> {
        if var.is_replicated() {
            self.site_ids().collect()
        } else {
            vec![self.home_site(var)]
        }
    }

    /// Variables stored at `site`, in ascending order.
    pub fn variables_at(&self, site: SiteId) -> Vec<VarId> {
        self.variable_ids()
            .filter(|var| var.is_replicated() || self.home_site(*var) == site)
            .collect()
    }

    /// Value of `var` committed at time zero.
    pub fn initial_value(&self, var: VarId) -> Value {
        Value::from(var.index()) * self.initial_value_factor
    }
}
