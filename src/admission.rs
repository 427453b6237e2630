//! Pure in-memory anti-abuse ledger: per-session cooldown, hourly cap,
//! same-track suppression, per-network cap. Admission and recording
//! are a single atomic step guarded by whatever per-event lock the
//! caller already holds — this module performs no locking of its own.

use crate::error::VoteDenialReason;
use crate::models::{SessionId, TrackId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::IpAddr;

#[derive(Debug, Clone, Copy)]
pub struct AdmissionConfig {
    pub cooldown_seconds: u64,
    pub votes_per_hour: u32,
    pub same_track_cooldown_seconds: u64,
    pub ip_hourly_multiplier: u32,
}

impl AdmissionConfig {
    fn longest_window(&self) -> chrono::Duration {
        let hourly = chrono::Duration::hours(1);
        let same_track = chrono::Duration::seconds(self.same_track_cooldown_seconds as i64);
        hourly.max(same_track)
    }

    /// Ring buffer cap per session (§3 supplement): bounds a pathological
    /// session's record count between sweeps.
    fn ring_capacity(&self) -> usize {
        (self.votes_per_hour as usize).saturating_mul(4).max(8)
    }
}

#[derive(Debug, Clone)]
struct VoteRecord {
    track_id: TrackId,
    ip: IpAddr,
    at: DateTime<Utc>,
}

/// Outcome of a successful admission check, used by the caller to
/// decide whether to upsert-increment or insert a new queue row.
pub struct Admitted;

pub struct Denied {
    pub reason: VoteDenialReason,
    pub retry_after_secs: Option<u64>,
}

/// Per-event vote ledger. Owned exclusively by the coordinator's
/// per-event critical section; never shared across events.
#[derive(Debug, Default)]
pub struct VoteLedger {
    by_session: HashMap<SessionId, Vec<VoteRecord>>,
}

impl VoteLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic check-and-record. Checks run in order; first failure wins
    /// and nothing is recorded on denial.
    pub fn admit(
        &mut self,
        session_id: &SessionId,
        ip: IpAddr,
        track_id: &TrackId,
        now: DateTime<Utc>,
        config: &AdmissionConfig,
    ) -> Result<Admitted, Denied> {
        let hour_ago = now - chrono::Duration::hours(1);
        let records = self.by_session.get(session_id).map(Vec::as_slice).unwrap_or(&[]);

        if let Some(last) = records.last() {
            let elapsed = (now - last.at).num_seconds().max(0) as u64;
            if elapsed < config.cooldown_seconds {
                return Err(Denied {
                    reason: VoteDenialReason::SessionCooldown,
                    retry_after_secs: Some(config.cooldown_seconds - elapsed),
                });
            }
        }

        let votes_this_hour = records.iter().filter(|r| r.at >= hour_ago).count() as u32;
        if votes_this_hour >= config.votes_per_hour {
            return Err(Denied {
                reason: VoteDenialReason::SessionHourlyCap,
                retry_after_secs: None,
            });
        }

        let same_track_window = now - chrono::Duration::seconds(config.same_track_cooldown_seconds as i64);
        if records.iter().any(|r| r.track_id == *track_id && r.at >= same_track_window) {
            return Err(Denied {
                reason: VoteDenialReason::SameTrack,
                retry_after_secs: None,
            });
        }

        let network_cap = config.votes_per_hour.saturating_mul(config.ip_hourly_multiplier);
        let network_votes_this_hour = self
            .by_session
            .values()
            .flat_map(|recs| recs.iter())
            .filter(|r| r.ip == ip && r.at >= hour_ago)
            .count() as u32;
        if network_votes_this_hour >= network_cap {
            return Err(Denied {
                reason: VoteDenialReason::NetworkCap,
                retry_after_secs: None,
            });
        }

        let entry = self.by_session.entry(session_id.clone()).or_default();
        entry.push(VoteRecord {
            track_id: track_id.clone(),
            ip,
            at: now,
        });
        let cap = config.ring_capacity();
        if entry.len() > cap {
            let overflow = entry.len() - cap;
            entry.drain(0..overflow);
        }

        Ok(Admitted)
    }

    /// Drops records older than the longest relevant window across all
    /// sessions; called on a ≥5-minute interval by the coordinator's
    /// background sweeper.
    pub fn sweep(&mut self, now: DateTime<Utc>, config: &AdmissionConfig) {
        let cutoff = now - config.longest_window();
        self.by_session.retain(|_, records| {
            records.retain(|r| r.at >= cutoff);
            !records.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn config() -> AdmissionConfig {
        AdmissionConfig {
            cooldown_seconds: 30,
            votes_per_hour: 3,
            same_track_cooldown_seconds: 7_200,
            ip_hourly_multiplier: 2,
        }
    }

    fn ip(n: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, n))
    }

    #[test]
    fn first_vote_is_always_admitted() {
        let mut ledger = VoteLedger::new();
        let now = crate::utils::now();
        let result = ledger.admit(&"s1".to_string(), ip(1), &"t1".to_string(), now, &config());
        assert!(result.is_ok());
    }

    #[test]
    fn second_vote_within_cooldown_is_denied() {
        let mut ledger = VoteLedger::new();
        let now = crate::utils::now();
        let cfg = config();
        ledger.admit(&"s1".to_string(), ip(1), &"t1".to_string(), now, &cfg).unwrap();
        let result = ledger.admit(
            &"s1".to_string(),
            ip(1),
            &"t2".to_string(),
            now + chrono::Duration::seconds(5),
            &cfg,
        );
        match result {
            Err(denied) => {
                assert_eq!(denied.reason, VoteDenialReason::SessionCooldown);
                assert_eq!(denied.retry_after_secs, Some(25));
            }
            Ok(_) => panic!("expected denial"),
        }
    }

    #[test]
    fn same_track_suppressed_within_window_but_other_session_unaffected() {
        let mut ledger = VoteLedger::new();
        let now = crate::utils::now();
        let cfg = config();
        ledger.admit(&"s1".to_string(), ip(1), &"t1".to_string(), now, &cfg).unwrap();
        let retry = ledger.admit(
            &"s1".to_string(),
            ip(1),
            &"t1".to_string(),
            now + chrono::Duration::seconds(40),
            &cfg,
        );
        assert!(matches!(retry, Err(d) if d.reason == VoteDenialReason::SameTrack));

        let other_session = ledger.admit(
            &"s2".to_string(),
            ip(2),
            &"t1".to_string(),
            now + chrono::Duration::seconds(40),
            &cfg,
        );
        assert!(other_session.is_ok());
    }

    #[test]
    fn hourly_cap_denies_after_votes_per_hour() {
        let mut ledger = VoteLedger::new();
        let now = crate::utils::now();
        let cfg = config();
        for i in 0..3 {
            let t = now + chrono::Duration::seconds(i * 40);
            let track = format!("t{i}");
            ledger.admit(&"s1".to_string(), ip(1), &track, t, &cfg).unwrap();
        }
        let result = ledger.admit(
            &"s1".to_string(),
            ip(1),
            &"t-overflow".to_string(),
            now + chrono::Duration::seconds(200),
            &cfg,
        );
        assert!(matches!(result, Err(d) if d.reason == VoteDenialReason::SessionHourlyCap));
    }

    #[test]
    fn network_cap_spans_sessions_sharing_an_ip() {
        let mut ledger = VoteLedger::new();
        let now = crate::utils::now();
        let cfg = config(); // votes_per_hour=3, multiplier=2 => cap 6
        for i in 0..6 {
            let t = now + chrono::Duration::seconds(i * 40);
            let session = format!("s{}", i % 2);
            let track = format!("t{i}");
            ledger.admit(&session, ip(9), &track, t, &cfg).unwrap();
        }
        let result = ledger.admit(
            &"s-new".to_string(),
            ip(9),
            &"t-overflow".to_string(),
            now + chrono::Duration::seconds(300),
            &cfg,
        );
        assert!(matches!(result, Err(d) if d.reason == VoteDenialReason::NetworkCap));
    }

    #[test]
    fn sweep_drops_stale_records() {
        let mut ledger = VoteLedger::new();
        let now = crate::utils::now();
        let cfg = config();
        ledger.admit(&"s1".to_string(), ip(1), &"t1".to_string(), now, &cfg).unwrap();
        ledger.sweep(now + chrono::Duration::hours(3), &cfg);
        assert!(ledger.by_session.is_empty());
    }
}
