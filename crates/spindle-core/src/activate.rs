//! Auto-activation selection.
//!
//! Extensions carrying activation metadata are selected as a batch against
//! a url, a group tag and a user-supplied value list. The batch is ordered
//! by the activation comparator: `before`/`after` constraints first
//! (topological), then ascending `order`, then discovery order. The user
//! list is then spliced around the batch: `default` marks the batch's
//! position, `-name` excludes an entry, `-default` suppresses the batch
//! entirely.

use std::collections::HashMap;

use crate::class::ActivateMeta;
use crate::url::Url;

/// One auto-activation candidate, before instantiation.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub name: String,
    pub meta: ActivateMeta,
    /// Position in manifest discovery order, the final tie-break.
    pub discovery: usize,
}

/// Group predicate: an unset group or empty metadata matches anything.
pub(crate) fn group_matches(group: Option<&str>, groups: &[String]) -> bool {
    match group {
        None => true,
        Some(group) if group.is_empty() => true,
        Some(group) => groups.is_empty() || groups.iter().any(|g| g == group),
    }
}

/// Value predicate: active when no keys are declared, or when any declared
/// key matches a non-empty url parameter exactly or as a `.`-suffix.
pub(crate) fn is_active(meta: &ActivateMeta, url: &Url) -> bool {
    if meta.value.is_empty() {
        return true;
    }
    meta.value.iter().any(|key| {
        let suffix = format!(".{key}");
        url.parameters()
            .iter()
            .any(|(k, v)| (k == key || k.ends_with(&suffix)) && !v.is_empty())
    })
}

/// Order the batch: topological `before`/`after` constraints first, the
/// ready set drained by ascending `order` then discovery order. On a
/// constraint cycle the remaining entries are appended in (order,
/// discovery) order.
pub(crate) fn sort(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let n = candidates.len();
    let index: HashMap<&str, usize> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (c.name.as_str(), i))
        .collect();

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut indegree = vec![0usize; n];
    for (i, candidate) in candidates.iter().enumerate() {
        for name in &candidate.meta.before {
            if let Some(&j) = index.get(name.as_str()) {
                if j != i {
                    successors[i].push(j);
                    indegree[j] += 1;
                }
            }
        }
        for name in &candidate.meta.after {
            if let Some(&j) = index.get(name.as_str()) {
                if j != i {
                    successors[j].push(i);
                    indegree[i] += 1;
                }
            }
        }
    }

    let rank = |i: usize| (candidates[i].meta.order, candidates[i].discovery);
    let mut ready: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut ordered = Vec::with_capacity(n);
    while !ready.is_empty() {
        ready.sort_by_key(|&i| rank(i));
        let i = ready.remove(0);
        ordered.push(i);
        for &j in &successors[i] {
            indegree[j] -= 1;
            if indegree[j] == 0 {
                ready.push(j);
            }
        }
    }

    if ordered.len() < n {
        tracing::warn!(
            "activation before/after constraints form a cycle; falling back to numeric order"
        );
        let mut remaining: Vec<usize> = (0..n).filter(|i| !ordered.contains(i)).collect();
        remaining.sort_by_key(|&i| rank(i));
        ordered.extend(remaining);
    }

    let mut slots: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();
    ordered
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect()
}
