//! Per-export anonymization context.
//!
//! One context is created per export. It fixes the pseudonym and the
//! temporal offset for the whole export, so every category shares them,
//! while separate exports get different values.

use chrono::{Duration, DurationRound};
use clinexport_core::{ExportId, Time, UserId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

/// Upper bound of mood/energy/anxiety noise, in scale points.
pub const SCALE_NOISE: f64 = 0.5;

/// Upper bound of session duration noise, as a fraction of the duration.
pub const DURATION_NOISE: f64 = 0.05;

/// Per-export anonymization state.
#[derive(Debug)]
pub struct AnonymizationContext {
    pseudonym: String,
    salt: [u8; 8],
    time_offset: Duration,
    rng: StdRng,
}

impl AnonymizationContext {
    /// Context seeded from fresh randomness.
    pub fn for_export(export_id: ExportId, user_id: &UserId) -> Self {
        Self::with_seed(export_id, user_id, rand::thread_rng().gen())
    }

    /// Context with a fixed seed.
    pub fn with_seed(export_id: ExportId, user_id: &UserId, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let salt = seed.to_le_bytes();

        let mut hasher = Sha256::new();
        hasher.update(export_id.to_bytes());
        hasher.update(user_id.as_str().as_bytes());
        hasher.update(salt);
        let digest = hex::encode(hasher.finalize());
        let pseudonym = format!("anon-{}", &digest[..12]);

        // 30 to 365 days either way, never zero.
        let hours: i64 = rng.gen_range(30 * 24..=365 * 24);
        let sign = if rng.gen_bool(0.5) { 1 } else { -1 };
        let time_offset = Duration::hours(hours * sign);

        Self {
            pseudonym,
            salt,
            time_offset,
            rng,
        }
    }

    /// The subject pseudonym for this export.
    pub fn pseudonym(&self) -> &str {
        &self.pseudonym
    }

    /// The temporal offset for this export.
    pub fn time_offset(&self) -> Duration {
        self.time_offset
    }

    /// Stable replacement for a record id.
    pub fn pseudonymize_record_id(&self, id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.pseudonym.as_bytes());
        hasher.update(self.salt);
        hasher.update(id.as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("rec-{}", &digest[..12])
    }

    /// Apply the temporal offset.
    pub fn shift(&self, t: Time) -> Time {
        t + self.time_offset
    }

    /// Truncate to the start of the day.
    pub fn generalize(t: Time) -> Time {
        t.duration_trunc(Duration::days(1)).unwrap_or(t)
    }

    /// Add bounded uniform noise to a value on a closed scale.
    pub fn noisy_scale(&mut self, value: f64, min: f64, max: f64) -> f64 {
        let noise = self.rng.gen_range(-SCALE_NOISE..=SCALE_NOISE);
        (value + noise).clamp(min, max)
    }

    /// Add bounded proportional noise to a non-negative quantity.
    pub fn noisy_duration(&mut self, minutes: f64) -> f64 {
        let factor = 1.0 + self.rng.gen_range(-DURATION_NOISE..=DURATION_NOISE);
        (minutes * factor).max(0.0)
    }
}
