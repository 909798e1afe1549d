//! Elo rating updates.
//!
//! Absent from the teacher entirely (`checkai` has no player or rating
//! concept); implemented as a pure function of the GLOSSARY's formula
//! (`spec.md` GLOSSARY: `E = 1/(1+10^((Ropp-Rme)/400))`,
//! `ΔR = round(K(score-E))`).

/// A completed game's outcome from one player's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    Win,
    Draw,
    Loss,
}

impl Score {
    fn value(self) -> f64 {
        match self {
            Score::Win => 1.0,
            Score::Draw => 0.5,
            Score::Loss => 0.0,
        }
    }
}

/// Expected score for a player rated `rating` against an opponent rated
/// `opponent_rating`.
pub fn expected_score(rating: i32, opponent_rating: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent_rating - rating) as f64 / 400.0))
}

/// The signed rating delta for one player, clamped so the resulting rating
/// stays within `[min_rating, max_rating]`.
pub fn rating_delta(rating: i32, opponent_rating: i32, score: Score, k_factor: i32, min_rating: i32, max_rating: i32) -> i32 {
    let e = expected_score(rating, opponent_rating);
    let delta = (k_factor as f64 * (score.value() - e)).round() as i32;
    (rating + delta).clamp(min_rating, max_rating) - rating
}

/// Computes both players' deltas for one finished game.
pub fn game_deltas(white_rating: i32, black_rating: i32, white_score: Score, k_factor: i32, min_rating: i32, max_rating: i32) -> (i32, i32) {
    let black_score = match white_score {
        Score::Win => Score::Loss,
        Score::Loss => Score::Win,
        Score::Draw => Score::Draw,
    };
    let white_delta = rating_delta(white_rating, black_rating, white_score, k_factor, min_rating, max_rating);
    let black_delta = rating_delta(black_rating, white_rating, black_score, k_factor, min_rating, max_rating);
    (white_delta, black_delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_ratings_win_gives_half_k() {
        let delta = rating_delta(1200, 1200, Score::Win, 32, 100, 3000);
        assert_eq!(delta, 16);
    }

    #[test]
    fn underdog_win_gains_more_than_k_half() {
        let delta = rating_delta(1200, 1600, Score::Win, 32, 100, 3000);
        assert!(delta > 16);
    }

    #[test]
    fn rating_never_drops_below_minimum() {
        let delta = rating_delta(110, 2800, Score::Loss, 32, 100, 3000);
        assert!(110 + delta >= 100);
    }

    #[test]
    fn deltas_are_zero_sum_when_ratings_are_equal() {
        let (w, b) = game_deltas(1200, 1200, Score::Win, 32, 100, 3000);
        assert_eq!(w, -b);
    }
}
