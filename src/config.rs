// Copyright (c) 2022 by Rivos Inc.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use sbi_rs::{NaclFeature, NaclVersion};
use static_assertions::const_assert;

/// Maximum number of harts that can be tracked.
pub const MAX_HARTS: usize = 64;
/// Upper bound on the configurable batch length.
pub const MAX_BATCH_LEN: usize = 256;
/// Batch length used unless configured otherwise.
pub const DEFAULT_BATCH_LEN: usize = 64;

const_assert!(MAX_HARTS > 0);
const_assert!(DEFAULT_BATCH_LEN > 0 && DEFAULT_BATCH_LEN <= MAX_BATCH_LEN);

/// The version of the NACL interface implemented here.
pub const NACL_VERSION: NaclVersion = NaclVersion {
    major: 1,
    minor: 0,
    patch: 0,
};

/// Version reported for each supported feature.
pub const NACL_FEATURE_VERSION: u64 = 1;

/// Errors resulting from an invalid `NaclConfig`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// At least one hart is required.
    NoHarts,
    /// More than `MAX_HARTS` harts were requested.
    TooManyHarts(usize),
    /// The batch length must be between 1 and `MAX_BATCH_LEN`.
    BatchLenOutOfRange(usize),
    /// The feature is enabled but a feature it depends on isn't.
    MissingDependency(NaclFeature),
}

/// Holds the result of validating a configuration.
pub type Result<T> = core::result::Result<T, Error>;

/// A set of `NaclFeature`s.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeatureSet(u64);

impl FeatureSet {
    /// Returns the set of every defined feature.
    pub fn all() -> Self {
        NaclFeature::ALL
            .iter()
            .fold(Self::empty(), |set, f| set.with(*f))
    }

    /// Returns an empty set.
    pub const fn empty() -> Self {
        FeatureSet(0)
    }

    /// Returns `self` with `feature` added.
    pub fn with(self, feature: NaclFeature) -> Self {
        FeatureSet(self.0 | (1 << feature as u64))
    }

    /// Returns `self` with `feature` removed.
    pub fn without(self, feature: NaclFeature) -> Self {
        FeatureSet(self.0 & !(1 << feature as u64))
    }

    /// Returns true if `feature` is in the set.
    pub fn contains(&self, feature: NaclFeature) -> bool {
        self.0 & (1 << feature as u64) != 0
    }
}

impl Default for FeatureSet {
    fn default() -> Self {
        Self::all()
    }
}

/// Boot-time configuration of the NACL implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NaclConfig {
    /// Number of harts; hart IDs are `0..num_harts`.
    pub num_harts: usize,
    /// Maximum number of descriptors accepted by a single batch.
    pub max_batch_len: usize,
    /// Features advertised to and usable by guest hypervisors.
    pub features: FeatureSet,
    /// Version reported by `GetVersion`.
    pub version: NaclVersion,
}

impl Default for NaclConfig {
    fn default() -> Self {
        Self {
            num_harts: 1,
            max_batch_len: DEFAULT_BATCH_LEN,
            features: FeatureSet::all(),
            version: NACL_VERSION,
        }
    }
}

impl NaclConfig {
    /// Returns the default configuration for `num_harts` harts.
    pub fn with_harts(num_harts: usize) -> Self {
        Self {
            num_harts,
            ..Self::default()
        }
    }

    /// Checks that the configuration can be used.
    pub fn validate(&self) -> Result<()> {
        if self.num_harts == 0 {
            return Err(Error::NoHarts);
        }
        if self.num_harts > MAX_HARTS {
            return Err(Error::TooManyHarts(self.num_harts));
        }
        if self.max_batch_len == 0 || self.max_batch_len > MAX_BATCH_LEN {
            return Err(Error::BatchLenOutOfRange(self.max_batch_len));
        }
        if self.features.contains(NaclFeature::AutoswapCsr)
            && !self.features.contains(NaclFeature::SyncSret)
        {
            return Err(Error::MissingDependency(NaclFeature::SyncSret));
        }
        Ok(())
    }

    /// Returns the version `ProbeFeature` reports for `feature_id`, or 0 if it's unknown or
    /// disabled.
    pub fn feature_version(&self, feature_id: u64) -> u64 {
        match NaclFeature::from_id(feature_id) {
            Some(f) if self.features.contains(f) => NACL_FEATURE_VERSION,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = NaclConfig::default();
        assert!(config.validate().is_ok());
        for f in NaclFeature::ALL {
            assert!(config.features.contains(f));
        }
    }

    #[test]
    fn invalid_configs() {
        assert_eq!(NaclConfig::with_harts(0).validate(), Err(Error::NoHarts));
        assert_eq!(
            NaclConfig::with_harts(MAX_HARTS + 1).validate(),
            Err(Error::TooManyHarts(MAX_HARTS + 1))
        );
        let config = NaclConfig {
            max_batch_len: MAX_BATCH_LEN + 1,
            ..NaclConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(Error::BatchLenOutOfRange(MAX_BATCH_LEN + 1))
        );
        let config = NaclConfig {
            features: FeatureSet::all().without(NaclFeature::SyncSret),
            ..NaclConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(Error::MissingDependency(NaclFeature::SyncSret))
        );
    }

    #[test]
    fn feature_versions() {
        let config = NaclConfig {
            features: FeatureSet::all().without(NaclFeature::Batch),
            ..NaclConfig::default()
        };
        assert_eq!(config.feature_version(NaclFeature::SyncCsr as u64), 1);
        assert_eq!(config.feature_version(NaclFeature::Batch as u64), 0);
        assert_eq!(config.feature_version(1000), 0);
    }
}
