use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Trailing-30-day behavioral statistics for one repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PersonalityProfile {
    pub repository: String,
    pub total_failures: usize,
    pub dominant_category: String,
    #[schema(value_type = Vec<Object>)]
    pub category_histogram: Vec<(String, usize)>,
    /// Monday-first weekday counts.
    #[schema(value_type = Vec<usize>)]
    pub day_of_week_histogram: [usize; 7],
    #[schema(value_type = Vec<usize>)]
    pub hour_histogram: [usize; 24],
    pub flaky_rate: f64,
    pub avg_resolution_minutes: f64,
    pub success_rate: f64,
    pub detected_patterns: Vec<DetectedPattern>,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DetectedPattern {
    pub kind: ProfileFlag,
    pub frequency: f64,
    pub description: String,
    /// Fractional confidence delta, applied to model confidence as
    /// percentage points (x100) and clamped.
    pub confidence_adjust: f64,
    pub recommendation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProfileFlag {
    FlakyProne,
    FridaySpike,
    CategorySpecialist,
    TimeOfDay,
    SlowResolution,
}
