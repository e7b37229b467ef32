use serde::{Deserialize, Serialize};

/// One row of a category or priority breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub name: String,
    pub count: u64,
}

/// Aggregate counts served by `GET /api/stats`.
///
/// `connected_clients` is only known to the gateway; locally computed stats
/// leave it unset.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Stats {
    pub total_issues: u64,
    pub classified_issues: u64,
    pub pending_issues: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_clients: Option<u64>,
    #[serde(default)]
    pub categories: Vec<Bucket>,
    #[serde(default)]
    pub priorities: Vec<Bucket>,
}

/// Sort rank the gateway uses for priority breakdowns; unknown levels last.
#[must_use]
pub fn priority_rank(priority: &str) -> u8 {
    match priority {
        "critical" => 1,
        "high" => 2,
        "medium" => 3,
        "low" => 4,
        _ => 5,
    }
}

impl Stats {
    /// Share of `count` in the total, as a percentage in `[0, 100]`.
    #[must_use]
    pub fn percentage(&self, count: u64) -> f64 {
        if self.total_issues == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = count as f64 / self.total_issues as f64;
        ratio * 100.0
    }
}
