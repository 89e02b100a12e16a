//! Per-repository behavioral statistics over a trailing 30-day window,
//! cached with a short TTL and used to adjust model confidence.

use crate::clock::Clock;
use crate::error::FailureError;
use crate::failures::FailureRepository;
use crate::types::{DetectedPattern, PersonalityProfile, ProfileFlag};
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub const LEARNING_WINDOW_DAYS: i64 = 30;
pub const MIN_FAILURES_FOR_PROFILE: usize = 5;
pub const CACHE_TTL_MINUTES: i64 = 15;

const FLAKY_THRESHOLD: f64 = 0.3;
const FRIDAY_THRESHOLD: f64 = 0.4;
const SPECIALIST_THRESHOLD: f64 = 0.5;
const HOUR_SPIKE_THRESHOLD: f64 = 0.3;
const SLOW_RESOLUTION_MINUTES: f64 = 30.0;

/// Bound on the adjustment applied to model confidence, as a fraction.
pub const MAX_CONFIDENCE_ADJUST: f64 = 0.2;

pub struct PersonalityProfiler {
    clock: Arc<dyn Clock>,
    cache: Mutex<HashMap<String, PersonalityProfile>>,
}

impl PersonalityProfiler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn profile<R: FailureRepository>(
        &self,
        failures: &R,
        repository: &str,
    ) -> Result<PersonalityProfile, FailureError> {
        let now = self.clock.now();
        {
            let cache = self.cache.lock().expect("profile cache poisoned");
            if let Some(cached) = cache.get(repository) {
                if now - cached.computed_at < ChronoDuration::minutes(CACHE_TTL_MINUTES) {
                    debug!(repository, "personality profile cache hit");
                    return Ok(cached.clone());
                }
            }
        }

        let since = now - ChronoDuration::days(LEARNING_WINDOW_DAYS);
        let stats = failures.stats_window(Some(repository), since)?;
        let profile = compute_profile(repository, &stats, now);
        info!(
            repository,
            failures = profile.total_failures,
            flags = profile.detected_patterns.len(),
            flaky_rate = profile.flaky_rate,
            "personality profile computed"
        );

        self.cache
            .lock()
            .expect("profile cache poisoned")
            .insert(repository.to_string(), profile.clone());
        Ok(profile)
    }

    /// Fractional confidence adjustment for a failure in `category` observed
    /// at `at`. Bounded to +/- MAX_CONFIDENCE_ADJUST.
    pub fn confidence_adjustment<R: FailureRepository>(
        &self,
        failures: &R,
        repository: &str,
        category: &str,
        at: DateTime<Utc>,
    ) -> Result<f64, FailureError> {
        let profile = self.profile(failures, repository)?;
        let mut adjustment = 0.0;
        for pattern in &profile.detected_patterns {
            let applies = match pattern.kind {
                ProfileFlag::FlakyProne => category == "flaky_test",
                ProfileFlag::FridaySpike => at.weekday().num_days_from_monday() == 4,
                ProfileFlag::CategorySpecialist => category == profile.dominant_category,
                ProfileFlag::TimeOfDay | ProfileFlag::SlowResolution => false,
            };
            if applies {
                adjustment += pattern.confidence_adjust;
            }
        }
        Ok(adjustment.clamp(-MAX_CONFIDENCE_ADJUST, MAX_CONFIDENCE_ADJUST))
    }

    pub fn invalidate(&self, repository: &str) {
        self.cache
            .lock()
            .expect("profile cache poisoned")
            .remove(repository);
    }
}

fn compute_profile(
    repository: &str,
    stats: &[crate::types::FailureStat],
    now: DateTime<Utc>,
) -> PersonalityProfile {
    if stats.len() < MIN_FAILURES_FOR_PROFILE {
        return default_profile(repository, stats.len(), now);
    }

    let total = stats.len();
    let mut category_counts: HashMap<&str, usize> = HashMap::new();
    let mut days = [0usize; 7];
    let mut hours = [0usize; 24];
    let mut flaky = 0usize;
    let mut succeeded = 0usize;
    let mut resolution_total_ms = 0i64;
    let mut resolved = 0usize;

    for stat in stats {
        let category = stat.category.as_deref().unwrap_or("unknown");
        *category_counts.entry(category).or_default() += 1;
        days[stat.detected_at.weekday().num_days_from_monday() as usize] += 1;
        hours[stat.detected_at.hour() as usize] += 1;
        if category == "flaky_test" {
            flaky += 1;
        }
        if stat.remediation_succeeded() {
            succeeded += 1;
        }
        if let Some(ms) = stat.resolution_ms {
            resolution_total_ms += ms;
            resolved += 1;
        }
    }

    let mut histogram: Vec<(String, usize)> = category_counts
        .iter()
        .map(|(k, v)| (k.to_string(), *v))
        .collect();
    histogram.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let (dominant_category, dominant_count) = histogram
        .first()
        .map(|(k, v)| (k.clone(), *v))
        .unwrap_or_else(|| ("unknown".to_string(), 0));

    let flaky_rate = flaky as f64 / total as f64;
    let success_rate = succeeded as f64 / total as f64;
    let avg_resolution_minutes = if resolved > 0 {
        (resolution_total_ms as f64 / resolved as f64) / 60_000.0
    } else {
        0.0
    };

    let mut detected = Vec::new();
    if flaky_rate >= FLAKY_THRESHOLD {
        detected.push(DetectedPattern {
            kind: ProfileFlag::FlakyProne,
            frequency: flaky_rate,
            description: format!("high flaky test rate ({:.0}%)", flaky_rate * 100.0),
            confidence_adjust: -0.1,
            recommendation: "quarantine flaky tests or raise retry counts".to_string(),
        });
    }
    let friday_rate = days[4] as f64 / total as f64;
    if friday_rate >= FRIDAY_THRESHOLD {
        detected.push(DetectedPattern {
            kind: ProfileFlag::FridaySpike,
            frequency: friday_rate,
            description: format!("failure spike on Fridays ({:.0}%)", friday_rate * 100.0),
            confidence_adjust: -0.05,
            recommendation: "review Friday deployment practices".to_string(),
        });
    }
    let specialist_rate = dominant_count as f64 / total as f64;
    if specialist_rate >= SPECIALIST_THRESHOLD {
        detected.push(DetectedPattern {
            kind: ProfileFlag::CategorySpecialist,
            frequency: specialist_rate,
            description: format!(
                "failures dominated by {dominant_category} ({:.0}%)",
                specialist_rate * 100.0
            ),
            confidence_adjust: 0.1,
            recommendation: format!("focus prevention work on {dominant_category} failures"),
        });
    }
    if let Some((peak_hour, peak_count)) =
        hours.iter().enumerate().max_by_key(|(_, count)| **count)
    {
        let peak_rate = *peak_count as f64 / total as f64;
        if peak_rate >= HOUR_SPIKE_THRESHOLD {
            detected.push(DetectedPattern {
                kind: ProfileFlag::TimeOfDay,
                frequency: peak_rate,
                description: format!(
                    "failure spike around {peak_hour:02}:00 UTC ({:.0}%)",
                    peak_rate * 100.0
                ),
                confidence_adjust: 0.0,
                recommendation: format!(
                    "check what runs around {peak_hour:02}:00 (deploys, cron jobs)"
                ),
            });
        }
    }
    if avg_resolution_minutes > SLOW_RESOLUTION_MINUTES {
        detected.push(DetectedPattern {
            kind: ProfileFlag::SlowResolution,
            frequency: 1.0,
            description: format!("slow average resolution ({avg_resolution_minutes:.1} min)"),
            confidence_adjust: 0.0,
            recommendation: "investigate why remediations take longer than average".to_string(),
        });
    }

    PersonalityProfile {
        repository: repository.to_string(),
        total_failures: total,
        dominant_category,
        category_histogram: histogram,
        day_of_week_histogram: days,
        hour_histogram: hours,
        flaky_rate,
        avg_resolution_minutes,
        success_rate,
        detected_patterns: detected,
        computed_at: now,
    }
}

fn default_profile(repository: &str, total: usize, now: DateTime<Utc>) -> PersonalityProfile {
    PersonalityProfile {
        repository: repository.to_string(),
        total_failures: total,
        dominant_category: "unknown".to_string(),
        category_histogram: Vec::new(),
        day_of_week_histogram: [0; 7],
        hour_histogram: [0; 24],
        flaky_rate: 0.0,
        avg_resolution_minutes: 0.0,
        success_rate: 0.0,
        detected_patterns: Vec::new(),
        computed_at: now,
    }
}
