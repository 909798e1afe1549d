//! Rating-banded matchmaking queue with time-based band expansion.
//!
//! Entirely new relative to the teacher (`checkai` creates games directly
//! through its REST API with no opponent pairing at all); grounded directly
//! in `spec.md` §4.4's algorithm description, using the same
//! "periodic sweep over a shared concurrent registry" shape as
//! [`crate::manager::spawn_timeout_monitor`], and `rand` for color
//! assignment.

use std::collections::HashMap;

use rand::Rng;
use tokio::sync::RwLock;
use uuid::Uuid;

/// One queued player (`spec.md` §3's `MatchRequest`).
#[derive(Debug, Clone)]
pub struct MatchRequest {
    pub player_id: Uuid,
    pub username: String,
    pub rating: i32,
    pub time_control: String,
    pub initial_time_ms: i64,
    pub increment_ms: i64,
    pub initial_band: i32,
    pub current_band: i32,
    pub queued_at_ms: i64,
}

/// A pairing emitted by a sweep, with colors already assigned.
#[derive(Debug, Clone)]
pub struct Pairing {
    pub white: MatchRequest,
    pub black: MatchRequest,
}

pub struct MatchmakerConfig {
    pub default_rating_range: i32,
    pub max_rating_range: i32,
    pub expansion_interval_ms: i64,
    pub expansion_amount: i32,
}

/// The queue, keyed by player id so re-enqueueing replaces a prior request
/// and a player can never hold two entries (`spec.md` §4.4 invariant).
pub struct Matchmaker {
    queue: RwLock<HashMap<Uuid, MatchRequest>>,
    config: MatchmakerConfig,
}

impl Matchmaker {
    pub fn new(config: MatchmakerConfig) -> Self {
        Self { queue: RwLock::new(HashMap::new()), config }
    }

    pub async fn enqueue(&self, player_id: Uuid, username: String, rating: i32, time_control: String, initial_time_ms: i64, increment_ms: i64, now_ms: i64) {
        let request = MatchRequest {
            player_id,
            username,
            rating,
            time_control,
            initial_time_ms,
            increment_ms,
            initial_band: self.config.default_rating_range,
            current_band: self.config.default_rating_range,
            queued_at_ms: now_ms,
        };
        self.queue.write().await.insert(player_id, request);
    }

    pub async fn cancel(&self, player_id: Uuid) {
        self.queue.write().await.remove(&player_id);
    }

    /// 1-based rank among requests queued at or before this player's time,
    /// within the same time-control bucket.
    pub async fn position_of(&self, player_id: Uuid) -> Option<usize> {
        let queue = self.queue.read().await;
        let me = queue.get(&player_id)?;
        let rank = queue
            .values()
            .filter(|r| r.time_control == me.time_control && r.queued_at_ms <= me.queued_at_ms)
            .count();
        Some(rank)
    }

    /// Expands every queued request's band by elapsed time, then pairs
    /// within each time-control bucket: sort by `queuedAt`, and for each
    /// still-unmatched request scan later requests for the
    /// minimum-rating-difference peer within `min(band1, band2)`.
    /// Operates on a local snapshot; both sides are rechecked for presence
    /// immediately before being removed, so a request cancelled mid-sweep
    /// cannot be paired twice (`spec.md` §4.4 invariant).
    pub async fn sweep(&self, now_ms: i64) -> Vec<Pairing> {
        {
            let mut queue = self.queue.write().await;
            for request in queue.values_mut() {
                let expansions = ((now_ms - request.queued_at_ms) / self.config.expansion_interval_ms).max(0) as i32;
                request.current_band = (request.initial_band + expansions * self.config.expansion_amount).min(self.config.max_rating_range);
            }
        }

        let snapshot: Vec<MatchRequest> = self.queue.read().await.values().cloned().collect();
        let mut by_time_control: HashMap<String, Vec<MatchRequest>> = HashMap::new();
        for request in snapshot {
            by_time_control.entry(request.time_control.clone()).or_default().push(request);
        }

        let mut pairings = Vec::new();
        let mut matched: std::collections::HashSet<Uuid> = std::collections::HashSet::new();

        for bucket in by_time_control.values_mut() {
            bucket.sort_by_key(|r| r.queued_at_ms);
            for i in 0..bucket.len() {
                if matched.contains(&bucket[i].player_id) {
                    continue;
                }
                let mut best: Option<usize> = None;
                let mut best_diff = i32::MAX;
                for j in (i + 1)..bucket.len() {
                    if matched.contains(&bucket[j].player_id) {
                        continue;
                    }
                    let diff = (bucket[i].rating - bucket[j].rating).abs();
                    let allowed = bucket[i].current_band.min(bucket[j].current_band);
                    if diff <= allowed && diff < best_diff {
                        best_diff = diff;
                        best = Some(j);
                    }
                }
                if let Some(j) = best {
                    matched.insert(bucket[i].player_id);
                    matched.insert(bucket[j].player_id);
                    let (white, black) = assign_colors(bucket[i].clone(), bucket[j].clone());
                    pairings.push(Pairing { white, black });
                }
            }
        }

        if !pairings.is_empty() {
            let mut queue = self.queue.write().await;
            for pairing in &pairings {
                let both_present = queue.contains_key(&pairing.white.player_id) && queue.contains_key(&pairing.black.player_id);
                if both_present {
                    queue.remove(&pairing.white.player_id);
                    queue.remove(&pairing.black.player_id);
                }
            }
        }

        pairings
    }
}

fn assign_colors(a: MatchRequest, b: MatchRequest) -> (MatchRequest, MatchRequest) {
    if rand::thread_rng().gen_bool(0.5) {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MatchmakerConfig {
        MatchmakerConfig { default_rating_range: 100, max_rating_range: 400, expansion_interval_ms: 10_000, expansion_amount: 50 }
    }

    #[tokio::test]
    async fn no_pair_when_ratings_exceed_initial_band() {
        let mm = Matchmaker::new(config());
        mm.enqueue(Uuid::new_v4(), "a".into(), 1500, "blitz".into(), 300_000, 0, 0).await;
        mm.enqueue(Uuid::new_v4(), "b".into(), 1650, "blitz".into(), 300_000, 0, 0).await;
        let pairings = mm.sweep(0).await;
        assert!(pairings.is_empty());
    }

    #[tokio::test]
    async fn pairs_once_band_expansion_covers_the_gap() {
        let mm = Matchmaker::new(config());
        mm.enqueue(Uuid::new_v4(), "a".into(), 1500, "blitz".into(), 300_000, 0, 0).await;
        mm.enqueue(Uuid::new_v4(), "b".into(), 1650, "blitz".into(), 300_000, 0, 0).await;
        // one expansion interval: band = 100 + 50 = 150 >= |Δ|=150
        let pairings = mm.sweep(10_000).await;
        assert_eq!(pairings.len(), 1);
    }

    #[tokio::test]
    async fn a_player_is_never_paired_twice() {
        let mm = Matchmaker::new(config());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        mm.enqueue(a, "a".into(), 1200, "blitz".into(), 300_000, 0, 0).await;
        mm.enqueue(b, "b".into(), 1210, "blitz".into(), 300_000, 0, 0).await;
        mm.enqueue(c, "c".into(), 1220, "blitz".into(), 300_000, 0, 0).await;
        let pairings = mm.sweep(0).await;
        assert_eq!(pairings.len(), 1);
        let remaining = mm.queue.read().await.len();
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn cancel_removes_a_queued_request() {
        let mm = Matchmaker::new(config());
        let a = Uuid::new_v4();
        mm.enqueue(a, "a".into(), 1200, "blitz".into(), 300_000, 0, 0).await;
        mm.cancel(a).await;
        assert_eq!(mm.position_of(a).await, None);
    }
}
