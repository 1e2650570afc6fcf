use serde::{Deserialize, Serialize};

/// Priority is a secondary sort key within a model's `queue:{M}` sorted
/// set: spec.md's queue is scored by enqueue timestamp alone, so priority
/// is folded into the score as a bias rather than a separate structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum JobPriority {
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl Default for JobPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl JobPriority {
    pub fn all() -> &'static [JobPriority] {
        &[Self::Low, Self::Normal, Self::High, Self::Critical]
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Milliseconds subtracted from the enqueue-timestamp score so a
    /// higher-priority job claims ahead of older, lower-priority jobs
    /// without a separate per-priority structure.
    pub fn score_bias_ms(self) -> i64 {
        match self {
            Self::Low => 0,
            Self::Normal => 1_000,
            Self::High => 60_000,
            Self::Critical => 3_600_000,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for JobPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("invalid priority: {s}")),
        }
    }
}
