use crate::error::{SeedError, SeedResult};
use crate::sampler::{pick_weighted, uniform_weights, HOUR_OFFSET_WEIGHTS};
use crate::utm::{UtmAttribution, UtmParams};
use crate::window::{TimeWindow, MS_PER_DAY, MS_PER_HOUR};
use eventseed_config::MAX_TIME_RANGE_DAYS;
use rand::Rng;
use std::collections::HashMap;
use uuid::Uuid;

/// The synthetic identity applied to every line of one source session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub timestamp_ms: i64,
    pub session_id: Uuid,
    /// `None` keeps the visitor id already present in the line.
    pub visitor_id: Option<Uuid>,
    pub utm: Option<UtmAttribution>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionProbabilities {
    pub new_visitor: f64,
    pub utm_original: f64,
    pub utm_extra: f64,
}

impl Default for SessionProbabilities {
    fn default() -> Self {
        Self {
            new_visitor: 0.4,
            utm_original: 0.4,
            utm_extra: 0.6,
        }
    }
}

pub struct SessionState<R> {
    window: TimeWindow,
    day_weights: Vec<u32>,
    probabilities: SessionProbabilities,
    rng: R,
    sessions: HashMap<String, SessionIdentity>,
}

impl<R: Rng> SessionState<R> {
    pub fn new(window: TimeWindow, probabilities: SessionProbabilities, rng: R) -> SeedResult<Self> {
        if window.days == 0 || window.days > MAX_TIME_RANGE_DAYS {
            return Err(SeedError::InvalidTimeRange(window.days));
        }

        Ok(Self {
            window,
            day_weights: uniform_weights(window.days),
            probabilities,
            rng,
            sessions: HashMap::new(),
        })
    }

    /// Returns the identity for `key`, creating it on first sight.
    pub fn resolve(&mut self, key: &str) -> SeedResult<&SessionIdentity> {
        if !self.sessions.contains_key(key) {
            let identity = self.new_identity()?;
            self.sessions.insert(key.to_string(), identity);
        }

        Ok(&self.sessions[key])
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn new_identity(&mut self) -> SeedResult<SessionIdentity> {
        let day = pick_weighted(&self.day_weights, &mut self.rng)? as i64;
        let hour = pick_weighted(&HOUR_OFFSET_WEIGHTS, &mut self.rng)? as i64;
        let timestamp_ms = self.window.end_ms - day * MS_PER_DAY - hour * MS_PER_HOUR;

        let session_id = random_uuid(&mut self.rng);

        let visitor_id = if self.rng.random_bool(self.probabilities.new_visitor) {
            Some(random_uuid(&mut self.rng))
        } else {
            None
        };

        let utm = if self.rng.random_bool(self.probabilities.utm_original) {
            let original = UtmParams::random(&mut self.rng);
            let extra = if self.rng.random_bool(self.probabilities.utm_extra) {
                Some(UtmParams::random(&mut self.rng))
            } else {
                None
            };
            Some(UtmAttribution { original, extra })
        } else {
            None
        };

        Ok(SessionIdentity {
            timestamp_ms,
            session_id,
            visitor_id,
            utm,
        })
    }
}

/// A v4 uuid drawn from `rng` so seeded runs are reproducible.
pub fn random_uuid<R: Rng + ?Sized>(rng: &mut R) -> Uuid {
    uuid::Builder::from_random_bytes(rng.random()).into_uuid()
}
