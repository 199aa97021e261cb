/// Bytes reserved from the region source on first use: 1 MiB plus 4 KiB of slack.
pub const DEFAULT_REGION_SIZE: usize = 1024 * 1024 + 4096;

/// Default number of free blocks the free-space index can track.
pub const MAX_FREE_BLOCKS: usize = 1024;

/// How the free-space index picks a block for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitPolicy {
  /// First qualifying entry in heap storage order. The root is always the
  /// smallest block, so a request the smallest block satisfies gets it;
  /// anything larger gets whichever qualifying entry comes first in the array.
  #[default]
  StorageOrder,
  /// Smallest qualifying entry; ties go to the lowest slot.
  BestFit,
}

/// Heap construction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  pub region_size: usize,
  /// `None` lets the index grow without bound.
  pub index_capacity: Option<usize>,
  pub fit_policy: FitPolicy,
}

impl Config {
  pub const DEFAULT: Config = Config {
    region_size: DEFAULT_REGION_SIZE,
    index_capacity: Some(MAX_FREE_BLOCKS),
    fit_policy: FitPolicy::StorageOrder,
  };

  pub const fn with_region_size(
    mut self,
    region_size: usize,
  ) -> Self {
    self.region_size = region_size;
    self
  }

  pub const fn with_index_capacity(
    mut self,
    index_capacity: Option<usize>,
  ) -> Self {
    self.index_capacity = index_capacity;
    self
  }

  pub const fn with_fit_policy(
    mut self,
    fit_policy: FitPolicy,
  ) -> Self {
    self.fit_policy = fit_policy;
    self
  }
}

impl Default for Config {
  fn default() -> Self {
    Self::DEFAULT
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_builders_override_defaults() {
    let config = Config::default()
      .with_region_size(4096)
      .with_index_capacity(None)
      .with_fit_policy(FitPolicy::BestFit);

    assert_eq!(config.region_size, 4096);
    assert_eq!(config.index_capacity, None);
    assert_eq!(config.fit_policy, FitPolicy::BestFit);
    assert_eq!(Config::default().region_size, 1_052_672);
  }
}
