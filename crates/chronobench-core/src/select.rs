use crate::config::{RunOption, RunOrder};
use crate::model::RevisionInfo;
use chrono::{DateTime, Utc};

/// Produces the subset and ordering of revisions to attempt.
///
/// `history` must be the full revision history in chronological order, as
/// supplied by the VCS adapter.
pub fn select_revisions(
    history: &[RevisionInfo],
    start_date: Option<DateTime<Utc>>,
    option: RunOption,
    order: RunOrder,
) -> Vec<RevisionInfo> {
    let floored: Vec<&RevisionInfo> = match start_date {
        Some(floor) => history.iter().filter(|r| r.timestamp >= floor).collect(),
        None => history.iter().collect(),
    };

    let filtered: Vec<&RevisionInfo> = match option {
        RunOption::All => floored,
        RunOption::Last => floored.last().copied().into_iter().collect(),
        RunOption::Eod => last_per_day(&floored),
        RunOption::EveryNth(n) => floored.into_iter().step_by(n).collect(),
    };

    let ordered: Vec<&RevisionInfo> = match order {
        RunOrder::Normal => filtered,
        RunOrder::Reverse => filtered.into_iter().rev().collect(),
        RunOrder::Multires => multires_order(filtered.len())
            .into_iter()
            .map(|i| filtered[i])
            .collect(),
    };

    ordered.into_iter().cloned().collect()
}

/// Latest revision for each calendar date, in date order. Relies on the
/// input being chronological.
fn last_per_day<'a>(revisions: &[&'a RevisionInfo]) -> Vec<&'a RevisionInfo> {
    let mut out: Vec<&'a RevisionInfo> = Vec::new();
    for &rev in revisions {
        match out.last() {
            Some(prev) if prev.timestamp.date_naive() == rev.timestamp.date_naive() => {
                *out.last_mut().unwrap() = rev;
            }
            _ => out.push(rev),
        }
    }
    out
}

/// Multi-resolution visitation order over `0..n`.
///
/// Strides halve from the next power of two down to 1; each pass emits the
/// indices at that stride which no coarser pass emitted. A time-limited run
/// therefore gets rough whole-history coverage before the order drills into
/// detail. The result is a permutation of the full index set.
pub fn multires_order(n: usize) -> Vec<usize> {
    let mut order = Vec::with_capacity(n);
    if n == 0 {
        return order;
    }
    let mut emitted = vec![false; n];
    let mut stride = n.next_power_of_two();
    loop {
        let mut i = 0;
        while i < n {
            if !emitted[i] {
                emitted[i] = true;
                order.push(i);
            }
            i += stride;
        }
        if stride == 1 {
            break;
        }
        stride /= 2;
    }
    order
}
