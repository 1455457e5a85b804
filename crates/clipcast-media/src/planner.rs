//! Playback order planning.
//!
//! Every client computes "what is playing now" on its own, so the playback
//! order has to be a pure function of the item list and a seed. With shuffle
//! on, items are spread by artist so the same artist does not play back to
//! back while another artist still has items left.

use clipcast_common::PlaylistItem;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;

/// Compute one playback cycle.
///
/// Without shuffle the input order is returned unchanged.
pub fn plan_order<T, F>(items: Vec<T>, shuffle: bool, seed: u64, artist_key: F) -> Vec<T>
where
    F: Fn(&T) -> String,
{
    if shuffle {
        fairness_shuffle(items, seed, artist_key)
    } else {
        items
    }
}

/// [`plan_order`] for catalog items, keyed by [`PlaylistItem::artist_key`].
pub fn plan_items(items: Vec<PlaylistItem>, shuffle: bool, seed: u64) -> Vec<PlaylistItem> {
    plan_order(items, shuffle, seed, PlaylistItem::artist_key)
}

/// Deterministic artist-spreading shuffle.
///
/// Items are bucketed by artist key and each bucket is shuffled. Each pick
/// takes from the fullest bucket whose artist differs from the previous pick;
/// the previous artist is only repeated once every other bucket is empty.
pub fn fairness_shuffle<T, F>(items: Vec<T>, seed: u64, artist_key: F) -> Vec<T>
where
    F: Fn(&T) -> String,
{
    let mut rng = StdRng::seed_from_u64(seed);
    let total = items.len();

    // BTreeMap keeps bucket order independent of hashing.
    let mut grouped: BTreeMap<String, Vec<T>> = BTreeMap::new();
    for item in items {
        grouped.entry(artist_key(&item)).or_default().push(item);
    }

    let mut buckets: Vec<(String, Vec<T>)> = grouped
        .into_iter()
        .map(|(key, mut bucket)| {
            bucket.shuffle(&mut rng);
            (key, bucket)
        })
        .collect();

    let mut order = Vec::with_capacity(total);
    let mut last: Option<usize> = None;

    while order.len() < total {
        let mut candidates: Vec<usize> = (0..buckets.len())
            .filter(|&i| !buckets[i].1.is_empty() && Some(i) != last)
            .collect();
        if candidates.is_empty() {
            candidates = (0..buckets.len())
                .filter(|&i| !buckets[i].1.is_empty())
                .collect();
        }

        let Some(largest) = candidates.iter().map(|&i| buckets[i].1.len()).max() else {
            break;
        };
        let ties: Vec<usize> = candidates
            .into_iter()
            .filter(|&i| buckets[i].1.len() == largest)
            .collect();
        let Some(&pick) = ties.choose(&mut rng) else {
            break;
        };

        if let Some(item) = buckets[pick].1.pop() {
            order.push(item);
        }
        last = Some(pick);
    }

    order
}

/// Position inside a playback cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NowPlaying {
    /// Index into the planned order.
    pub index: usize,
    /// Seconds already played of that item.
    pub offset_secs: f64,
    /// Seconds left of that item.
    pub remaining_secs: f64,
}

/// Find the item playing `elapsed_secs` after the cycle started, looping.
///
/// Items with zero or unknown duration are skipped. Returns `None` when no
/// item has a known duration.
pub fn now_playing(durations: &[Option<f64>], elapsed_secs: f64) -> Option<NowPlaying> {
    let known = |d: &Option<f64>| d.filter(|d| d.is_finite() && *d > 0.0);

    let total: f64 = durations.iter().filter_map(known).sum();
    if total <= 0.0 {
        return None;
    }

    let position = elapsed_secs.max(0.0).rem_euclid(total);
    let mut cumulative = 0.0;
    let mut last_known = None;

    for (index, duration) in durations.iter().enumerate() {
        let Some(duration) = known(duration) else {
            continue;
        };
        if position < cumulative + duration {
            let offset_secs = position - cumulative;
            return Some(NowPlaying {
                index,
                offset_secs,
                remaining_secs: duration - offset_secs,
            });
        }
        cumulative += duration;
        last_known = Some((index, duration));
    }

    // Floating point rounding can leave `position` a hair past the end.
    last_known.map(|(index, duration)| NowPlaying {
        index,
        offset_secs: duration,
        remaining_secs: 0.0,
    })
}
