//! Majority-vote smoothing over recent raw classifications.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::classifier::Gesture;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Raw classifications kept in the window.
    pub history_len: usize,
    /// Window length required before a vote is trusted.
    pub min_votes: usize,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            history_len: 7,
            min_votes: 4,
        }
    }
}

/// Bounded history of raw states with an edge-triggered majority output.
#[derive(Debug, Clone)]
pub struct GestureSmoother {
    pub config: SmoothingConfig,
    history: VecDeque<Gesture>,
    /// Per-state counts over `history`, indexed by `Gesture::index`.
    counts: [usize; 4],
    /// Last majority handed to the scheduler.
    stable: Gesture,
}

impl Default for GestureSmoother {
    fn default() -> Self {
        Self::new(SmoothingConfig::default())
    }
}

impl GestureSmoother {
    pub fn new(config: SmoothingConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.history_len.max(1)),
            config,
            counts: [0; 4],
            stable: Gesture::Rest,
        }
    }

    /// Append a raw classification.  Returns the new majority only when it
    /// differs from the previous one.
    pub fn push(&mut self, raw: Gesture) -> Option<Gesture> {
        self.history.push_back(raw);
        self.counts[raw.index()] += 1;
        while self.history.len() > self.config.history_len.max(1) {
            if let Some(old) = self.history.pop_front() {
                self.counts[old.index()] -= 1;
            }
        }

        let majority = self.majority()?;
        if majority == self.stable {
            return None;
        }
        debug!(
            "Majority changed {} -> {} over {:?}",
            self.stable.as_str(),
            majority.as_str(),
            self.counts
        );
        self.stable = majority;
        Some(majority)
    }

    /// Most frequent state in the window, or `None` below the vote minimum.
    /// Ties go to the earliest state in enumeration order.
    pub fn majority(&self) -> Option<Gesture> {
        if self.history.len() < self.config.min_votes {
            return None;
        }
        let mut best = Gesture::Rest;
        for g in Gesture::ALL {
            if self.counts[g.index()] > self.counts[best.index()] {
                best = g;
            }
        }
        Some(best)
    }

    pub fn stable(&self) -> Gesture {
        self.stable
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.counts = [0; 4];
        self.stable = Gesture::Rest;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::classifier::Gesture::*;

    fn feed(s: &mut GestureSmoother, seq: &[Gesture]) -> Vec<Gesture> {
        seq.iter().filter_map(|g| s.push(*g)).collect()
    }

    #[test]
    fn test_no_vote_below_minimum() {
        let mut s = GestureSmoother::default();
        assert!(feed(&mut s, &[Next, Next, Next]).is_empty());
        assert_eq!(s.majority(), None);
        assert_eq!(s.push(Next), Some(Next));
    }

    #[test]
    fn test_identical_frames_emit_once() {
        let mut s = GestureSmoother::default();
        assert_eq!(feed(&mut s, &[Prev; 7]), vec![Prev]);
        assert!(feed(&mut s, &[Prev; 20]).is_empty());
    }

    #[test]
    fn test_rest_majority_not_emitted_initially() {
        let mut s = GestureSmoother::default();
        assert!(feed(&mut s, &[Rest; 10]).is_empty());
    }

    #[test]
    fn test_tie_broken_by_enumeration_order() {
        let mut s = GestureSmoother::default();
        assert_eq!(feed(&mut s, &[Next, Prev, Next, Prev]), vec![Next]);

        let mut s = GestureSmoother::default();
        assert!(feed(&mut s, &[Select, Select, Rest, Rest]).is_empty());
        assert_eq!(s.majority(), Some(Rest));
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut s = GestureSmoother::default();
        feed(&mut s, &[Next; 7]);
        assert_eq!(s.len(), 7);
        // Three selects are not enough against four remaining nexts.
        assert!(feed(&mut s, &[Select; 3]).is_empty());
        assert_eq!(s.push(Select), Some(Select));
        assert_eq!(s.len(), 7);
    }

    #[test]
    fn test_single_flicker_suppressed() {
        let mut s = GestureSmoother::default();
        let emitted = feed(&mut s, &[Rest, Rest, Rest, Next, Rest, Rest, Prev, Rest]);
        assert!(emitted.is_empty(), "got {:?}", emitted);
    }

    #[test]
    fn test_reset() {
        let mut s = GestureSmoother::default();
        feed(&mut s, &[Select; 5]);
        assert_eq!(s.stable(), Select);
        s.reset();
        assert!(s.is_empty());
        assert_eq!(s.stable(), Rest);
        assert_eq!(feed(&mut s, &[Select; 4]), vec![Select]);
    }
}
