//! Eviction Policy Abstraction: pure victim-selectors over the table's
//! recency sequence. Policies never perform I/O and never decide what to do
//! about a Dirty victim — that choreography belongs to the table (see
//! `PageTable::evict_one`).

use std::collections::HashMap;
use std::sync::Arc;

use crate::buffer::frame::{current_tick, PageFrame};
use crate::buffer::table::RecencyList;
use crate::common::{FileId, PageIndex};

type PageKey = (FileId, PageIndex);

pub trait EvictionPolicy: Send + Sync {
    /// Select a victim from the recency sequence, oldest-first. Must skip
    /// pinned or locked frames. Returns `None` when nothing is evictable.
    fn select_victim(
        &self,
        recency: &RecencyList,
        map: &HashMap<PageKey, Arc<PageFrame>>,
    ) -> Option<PageKey>;

    fn name(&self) -> &'static str;
}

/// Evicts the least-recently-used resident page: the first unpinned,
/// unlocked entry walking the recency sequence front (oldest) to back.
#[derive(Default)]
pub struct LruPolicy;

impl EvictionPolicy for LruPolicy {
    fn select_victim(
        &self,
        recency: &RecencyList,
        map: &HashMap<PageKey, Arc<PageFrame>>,
    ) -> Option<PageKey> {
        for key in recency.iter_front_to_back() {
            match map.get(&key) {
                // Stale entry (table and recency briefly out of step); the
                // table prunes these lazily whenever it notices one.
                None => continue,
                Some(frame) => {
                    if frame.is_pinned() || frame.is_locked() {
                        continue;
                    }
                    return Some(key);
                }
            }
        }
        None
    }

    fn name(&self) -> &'static str {
        "lru"
    }
}

/// Approximates CLOCK's reference bit with a recency-timestamp window: a
/// page counts as "referenced" if it was touched more recently than
/// `window_ticks` ticks ago. Each call walks the recency sequence once,
/// front (oldest) to back, giving every "referenced" candidate it passes a
/// second chance (its timestamp is refreshed so it reads as referenced for
/// less time going forward) instead of evicting it outright. Returns the
/// first candidate that is unpinned, unlocked, and not referenced, or
/// `None` if the whole sequence was referenced — in which case a caller
/// that retries (as `PageTable::evict_one` does) will find some candidates
/// have aged out of the window by then.
///
/// Deliberately has no persistent cursor: the scan always restarts at the
/// front on every call rather than resuming a clock hand left over from
/// the last sweep.
#[derive(Default)]
pub struct ClockPolicy {
    window_ticks: u64,
}

impl ClockPolicy {
    pub fn new(window_ticks: u64) -> Self {
        Self { window_ticks }
    }
}

impl EvictionPolicy for ClockPolicy {
    fn select_victim(
        &self,
        recency: &RecencyList,
        map: &HashMap<PageKey, Arc<PageFrame>>,
    ) -> Option<PageKey> {
        for key in recency.iter_front_to_back() {
            let Some(frame) = map.get(&key) else {
                continue;
            };
            if frame.is_pinned() || frame.is_locked() {
                continue;
            }
            let now = current_tick();
            let referenced = frame.last_accessed() > now.saturating_sub(self.window_ticks);
            if referenced {
                frame.touch();
                continue;
            }
            return Some(key);
        }
        None
    }

    fn name(&self) -> &'static str {
        "clock"
    }
}

/// Build a policy by name, falling back to LRU for unrecognized names.
pub fn create_policy(name: &str, clock_window_ticks: u64) -> Arc<dyn EvictionPolicy> {
    match name {
        "clock" => Arc::new(ClockPolicy::new(clock_window_ticks)),
        _ => Arc::new(LruPolicy::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::frame::PageFrame;

    #[test]
    fn unknown_policy_name_falls_back_to_lru() {
        let p = create_policy("nonsense", 1000);
        assert_eq!(p.name(), "lru");
    }

    #[test]
    fn clock_gives_second_chance_then_picks_next_stale_candidate() {
        let mut recency = RecencyList::default();
        let mut map: HashMap<PageKey, Arc<PageFrame>> = HashMap::new();

        let fresh = Arc::new(PageFrame::new_locked(1, 0));
        fresh.finish_load();
        let stale = Arc::new(PageFrame::new_locked(1, 1));
        stale.finish_load();

        // Scan order is fresh, then stale.
        recency.push_back((1, 0));
        recency.push_back((1, 1));
        map.insert((1, 0), fresh.clone());
        map.insert((1, 1), stale.clone());

        // Age the clock well past a small window, then refresh only
        // `fresh`. `stale` is left behind and falls outside the window.
        for _ in 0..10 {
            crate::buffer::frame::next_tick();
        }
        fresh.touch();

        let policy = ClockPolicy::new(2);
        let victim = policy.select_victim(&recency, &map);
        assert_eq!(victim, Some((1, 1)));
        assert!(fresh.last_accessed() > stale.last_accessed());
    }
}
