//! Depth-bounded downline aggregation.

use std::collections::{HashSet, VecDeque};

use contracts::DownlineSummary;

use crate::error::LedgerError;
use crate::store::LedgerStore;

/// Breadth-first walk below `root_id`, at most `max_depth` levels deep.
/// Users already visited are skipped, so a corrupted cyclic tree still
/// terminates and counts each user once.
pub fn downline<S: LedgerStore + ?Sized>(
    store: &S,
    root_id: &str,
    max_depth: usize,
) -> Result<DownlineSummary, LedgerError> {
    let mut summary = DownlineSummary::default();
    let mut visited = HashSet::from([root_id.to_string()]);
    let mut queue = VecDeque::from([(root_id.to_string(), 0_usize)]);

    while let Some((user_id, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for child in store.direct_referrals(&user_id)? {
            if !visited.insert(child.clone()) {
                continue;
            }
            let level = depth + 1;
            if level == 1 {
                summary.direct += 1;
            }
            summary.total += 1;
            *summary.by_level.entry(level as u8).or_insert(0) += 1;
            queue.push_back((child, level));
        }
    }

    Ok(summary)
}

/// Ancestors of `user_id`, nearest first, at most `max_depth` long.
pub fn referral_chain<S: LedgerStore + ?Sized>(
    store: &S,
    user_id: &str,
    max_depth: usize,
) -> Result<Vec<String>, LedgerError> {
    let mut chain = Vec::new();
    let mut current = user_id.to_string();
    while chain.len() < max_depth {
        let Some(referrer) = store.referrer_of(&current)? else {
            break;
        };
        chain.push(referrer.clone());
        current = referrer;
    }
    Ok(chain)
}
