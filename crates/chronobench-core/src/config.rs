use crate::errors::ConfigError;
use crate::model::ExistingPolicy;
use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Which revisions of the history to attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOption {
    /// Benchmark every revision.
    All,
    /// Only try the most recent revision.
    Last,
    /// End of day: the latest revision per calendar date.
    Eod,
    /// Every Nth revision by position.
    EveryNth(usize),
}

impl Default for RunOption {
    fn default() -> Self {
        RunOption::Eod
    }
}

impl FromStr for RunOption {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(RunOption::All),
            "last" => Ok(RunOption::Last),
            "eod" => Ok(RunOption::Eod),
            _ => match s.parse::<usize>() {
                Ok(n) if n > 0 => Ok(RunOption::EveryNth(n)),
                _ => Err(ConfigError(format!(
                    "unrecognized run_option {:?}: must be 'all', 'last', 'eod' or a positive integer",
                    s
                ))),
            },
        }
    }
}

impl fmt::Display for RunOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOption::All => write!(f, "all"),
            RunOption::Last => write!(f, "last"),
            RunOption::Eod => write!(f, "eod"),
            RunOption::EveryNth(n) => write!(f, "{}", n),
        }
    }
}

impl Serialize for RunOption {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RunOption::EveryNth(n) => serializer.serialize_u64(*n as u64),
            other => serializer.serialize_str(&other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for RunOption {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u64),
            Str(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Int(n) if n > 0 => Ok(RunOption::EveryNth(n as usize)),
            Raw::Int(n) => Err(D::Error::custom(format!(
                "run_option stride must be positive, got {}",
                n
            ))),
            Raw::Str(s) => s.parse().map_err(D::Error::custom),
        }
    }
}

/// In what order the selected revisions are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOrder {
    /// Original chronological order.
    #[default]
    Normal,
    /// Most recent first.
    Reverse,
    /// Cover all revisions, coarse strides first, refining progressively.
    Multires,
}

impl FromStr for RunOrder {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(RunOrder::Normal),
            "reverse" => Ok(RunOrder::Reverse),
            "multires" => Ok(RunOrder::Multires),
            _ => Err(ConfigError(format!(
                "unrecognized run_order {:?}: must be 'normal', 'reverse' or 'multires'",
                s
            ))),
        }
    }
}

/// Runner configuration. Unknown run-option / run-order values are rejected
/// at deserialization, before any revision is touched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub run_option: RunOption,
    #[serde(default)]
    pub run_order: RunOrder,
    #[serde(default)]
    pub existing: ExistingPolicy,
    /// Under the `min` policy, a benchmark is frozen once its best timing
    /// has survived this many consecutive re-runs unchanged.
    #[serde(default = "default_nochange_rerun_limit")]
    pub nochange_rerun_limit: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default = "default_use_blacklist")]
    pub use_blacklist: bool,
}

fn default_nochange_rerun_limit() -> i64 {
    5
}

fn default_use_blacklist() -> bool {
    true
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            run_option: RunOption::default(),
            run_order: RunOrder::default(),
            existing: ExistingPolicy::default(),
            nochange_rerun_limit: default_nochange_rerun_limit(),
            start_date: None,
            use_blacklist: default_use_blacklist(),
        }
    }
}

impl RunConfig {
    pub fn from_yaml(s: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_option_parses_known_values() {
        assert_eq!("all".parse::<RunOption>().unwrap(), RunOption::All);
        assert_eq!("eod".parse::<RunOption>().unwrap(), RunOption::Eod);
        assert_eq!("last".parse::<RunOption>().unwrap(), RunOption::Last);
        assert_eq!("7".parse::<RunOption>().unwrap(), RunOption::EveryNth(7));
    }

    #[test]
    fn run_option_rejects_unknown_values() {
        assert!("bogus".parse::<RunOption>().is_err());
        assert!("0".parse::<RunOption>().is_err());
        assert!("weekly".parse::<RunOrder>().is_err());
    }

    #[test]
    fn config_from_yaml() {
        let cfg = RunConfig::from_yaml(
            "run_option: 10\nrun_order: multires\nexisting: min\nnochange_rerun_limit: 3\n",
        )
        .unwrap();
        assert_eq!(cfg.run_option, RunOption::EveryNth(10));
        assert_eq!(cfg.run_order, RunOrder::Multires);
        assert_eq!(cfg.existing, ExistingPolicy::Min);
        assert_eq!(cfg.nochange_rerun_limit, 3);
        assert!(cfg.use_blacklist);
    }

    #[test]
    fn config_rejects_unknown_order() {
        assert!(RunConfig::from_yaml("run_order: weekly\n").is_err());
        assert!(RunConfig::from_yaml("run_option: sometimes\n").is_err());
    }

    #[test]
    fn config_defaults() {
        let cfg = RunConfig::from_yaml("{}").unwrap();
        assert_eq!(cfg.run_option, RunOption::Eod);
        assert_eq!(cfg.run_order, RunOrder::Normal);
        assert_eq!(cfg.existing, ExistingPolicy::Skip);
        assert_eq!(cfg.nochange_rerun_limit, 5);
    }
}
