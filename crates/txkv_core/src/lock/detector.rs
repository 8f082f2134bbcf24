//! Waits-for cycle search and victim selection.

use crate::config::DeadlockPolicy;
use crate::types::TransactionId;
use rand::Rng;
use std::cmp::Reverse;
use std::collections::HashSet;

/// What the detector knows about a cycle member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub txid: TransactionId,
    pub write_locks: usize,
    pub locks: usize,
}

/// Finds a waits-for cycle passing through `start`.
///
/// `edges(t)` returns the transactions `t` is waiting on. The returned path
/// starts at `start` and every element waits on the next, the last one
/// waiting on `start`.
pub(crate) fn find_cycle<F>(start: TransactionId, mut edges: F) -> Option<Vec<TransactionId>>
where
    F: FnMut(TransactionId) -> Vec<TransactionId>,
{
    let mut visited = HashSet::from([start]);
    let mut path = vec![start];
    let mut frontier = vec![edges(start).into_iter()];

    while let Some(next) = frontier.last_mut().map(Iterator::next) {
        match next {
            Some(txid) if txid == start => return Some(path),
            Some(txid) => {
                if visited.insert(txid) {
                    path.push(txid);
                    frontier.push(edges(txid).into_iter());
                }
            }
            None => {
                frontier.pop();
                path.pop();
            }
        }
    }

    None
}

impl DeadlockPolicy {
    /// Picks the transaction that receives the deadlock error.
    ///
    /// Ties go to the youngest transaction. `candidates` must not be empty.
    pub(crate) fn select_victim(self, candidates: &[Candidate]) -> Option<TransactionId> {
        let chosen = match self {
            Self::MinWrite => candidates
                .iter()
                .min_by_key(|c| (c.write_locks, Reverse(c.txid))),
            Self::MaxWrite => candidates.iter().max_by_key(|c| (c.write_locks, c.txid)),
            Self::MinLocks => candidates
                .iter()
                .min_by_key(|c| (c.locks, Reverse(c.txid))),
            Self::MaxLocks => candidates.iter().max_by_key(|c| (c.locks, c.txid)),
            Self::Oldest => candidates.iter().min_by_key(|c| c.txid),
            Self::Youngest => candidates.iter().max_by_key(|c| c.txid),
            Self::Random => {
                if candidates.is_empty() {
                    None
                } else {
                    candidates.get(rand::thread_rng().gen_range(0..candidates.len()))
                }
            }
        };
        chosen.map(|c| c.txid)
    }
}
