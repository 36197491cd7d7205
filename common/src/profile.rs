use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::features::FeatureSet;

/// Deployable service variant. One process serves exactly one profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Single `family_support` field; reverse predicts study hours only.
    SingleSupport,
    /// Financial and emotional support; reverse predicts hours and attendance.
    DualSupport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Predict,
    Reverse,
}

impl Operation {
    pub const ALL: [Operation; 2] = [Operation::Predict, Operation::Reverse];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Predict => "predict",
            Operation::Reverse => "reverse",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Profile::SingleSupport => "single_support",
            Profile::DualSupport => "dual_support",
        }
    }

    pub fn features(self, operation: Operation) -> FeatureSet {
        match (self, operation) {
            (Profile::SingleSupport, Operation::Predict) => FeatureSet::SingleSupportPredict,
            (Profile::SingleSupport, Operation::Reverse) => FeatureSet::SingleSupportReverse,
            (Profile::DualSupport, Operation::Predict) => FeatureSet::DualSupportPredict,
            (Profile::DualSupport, Operation::Reverse) => FeatureSet::DualSupportReverse,
        }
    }

    /// Number of values the model for `operation` must return.
    pub fn output_width(self, operation: Operation) -> usize {
        match (self, operation) {
            (_, Operation::Predict) => 1,
            (Profile::SingleSupport, Operation::Reverse) => 1,
            (Profile::DualSupport, Operation::Reverse) => 2,
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "single_support" | "single" => Ok(Profile::SingleSupport),
            "dual_support" | "dual" => Ok(Profile::DualSupport),
            other => Err(anyhow::anyhow!("unknown profile: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_dual_reverse_has_two_outputs() {
        assert_eq!(Profile::SingleSupport.output_width(Operation::Predict), 1);
        assert_eq!(Profile::SingleSupport.output_width(Operation::Reverse), 1);
        assert_eq!(Profile::DualSupport.output_width(Operation::Predict), 1);
        assert_eq!(Profile::DualSupport.output_width(Operation::Reverse), 2);
    }

    #[test]
    fn profiles_bind_distinct_feature_sets() {
        assert_eq!(
            Profile::DualSupport.features(Operation::Reverse),
            FeatureSet::DualSupportReverse
        );
        assert_ne!(
            Profile::SingleSupport.features(Operation::Predict),
            Profile::DualSupport.features(Operation::Predict)
        );
    }

    #[test]
    fn parses_env_style_names() {
        assert_eq!("dual-support".parse::<Profile>().unwrap(), Profile::DualSupport);
        assert_eq!(" SINGLE_SUPPORT ".parse::<Profile>().unwrap(), Profile::SingleSupport);
        assert!("triple".parse::<Profile>().is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        let p: Profile = serde_yaml::from_str("dual_support").unwrap();
        assert_eq!(p, Profile::DualSupport);
        assert_eq!(serde_json::to_string(&Operation::Reverse).unwrap(), "\"reverse\"");
    }
}
