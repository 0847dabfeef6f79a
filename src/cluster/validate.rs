use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Range;

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::prompts::{self, describe_unit};
use super::types::{Unit, UnitOrigin, ValidatedUnit};
use crate::config::ValidationConfig;
use crate::oracle::json::{deserialize_flag, deserialize_index, deserialize_indices, deserialize_text};
use crate::oracle::{self, Oracle, OracleFailure, Pacer};

#[derive(Debug, Default, Deserialize)]
struct BatchReply {
    #[serde(default)]
    units: Vec<UnitDecision>,
}

#[derive(Debug, Deserialize)]
struct UnitDecision {
    #[serde(default, deserialize_with = "deserialize_index")]
    unit: Option<usize>,
    #[serde(default, deserialize_with = "deserialize_text")]
    action: String,
    #[serde(default, deserialize_with = "deserialize_indices")]
    split_points: Vec<usize>,
    #[serde(default, deserialize_with = "deserialize_indices")]
    merge_with: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitAction {
    Keep,
    Split,
    Merge,
}

impl UnitDecision {
    fn action(&self) -> UnitAction {
        match self.action.trim().to_lowercase().as_str() {
            "split" => UnitAction::Split,
            "merge" => UnitAction::Merge,
            _ => UnitAction::Keep,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PairReply {
    #[serde(default)]
    pairs: Vec<PairDecision>,
}

#[derive(Debug, Deserialize)]
struct PairDecision {
    #[serde(default, deserialize_with = "deserialize_index")]
    pair: Option<usize>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    merge: bool,
}

pub struct ValidationReport {
    pub units: Vec<ValidatedUnit>,
    pub failures: Vec<OracleFailure>,
    pub oracle_calls: usize,
}

/// Correct atomic units with the oracle.
///
/// Pass one walks overlapping batches and asks for keep/split/merge per unit;
/// for an index seen by several batches the batch processed last decides.
/// Pass two asks, for every adjacent pair of the result, whether the pair is
/// one exchange, and collapses merge chains. A failed call leaves its units
/// as they were.
pub async fn validate_units(
    oracle: &dyn Oracle,
    units: &[Unit],
    config: &ValidationConfig,
    pacer: &mut Pacer,
) -> ValidationReport {
    let originals: Vec<Unit> = units
        .iter()
        .cloned()
        .enumerate()
        .map(|(i, unit)| unit.reindexed(i))
        .collect();

    let mut failures = Vec::new();
    let mut oracle_calls = 0;
    let mut reconciler = Reconciler::new(&originals);

    for (batch_no, range) in batch_ranges(originals.len(), config).into_iter().enumerate() {
        let prompt = batch_prompt(&originals[range.clone()]);
        pacer.wait().await;
        oracle_calls += 1;

        match oracle::ask::<BatchReply>(oracle, prompts::VALIDATE_SYSTEM, &prompt, config.budget)
            .await
        {
            Ok(reply) => {
                debug!(
                    batch = batch_no,
                    start = range.start,
                    decisions = reply.units.len(),
                    "batch validated"
                );
                reconciler.apply_batch(range.start, range.len(), &reply.units);
            }
            Err(error) => {
                warn!(batch = batch_no, %error, "batch validation failed, keeping units");
                failures.push(OracleFailure::new(
                    format!("validation batch {} (units {}-{})", batch_no + 1, range.start + 1, range.end),
                    error,
                ));
            }
        }
    }

    let batched = reconciler.finish();
    let batched_len = batched.len();
    let (units, pair_calls) = merge_adjacent(oracle, batched, config, pacer, &mut failures).await;
    oracle_calls += pair_calls;

    info!(
        atomic = originals.len(),
        after_batches = batched_len,
        validated = units.len(),
        failures = failures.len(),
        "unit validation complete"
    );

    ValidationReport {
        units,
        failures,
        oracle_calls,
    }
}

/// Overlapping windows of `batch_size` with `batch_overlap` shared units.
fn batch_ranges(len: usize, config: &ValidationConfig) -> Vec<Range<usize>> {
    let size = config.batch_size.max(1);
    let mut ranges = Vec::new();
    let mut start = 0;
    while start < len {
        let end = (start + size).min(len);
        ranges.push(start..end);
        if end == len {
            break;
        }
        start += config.stride();
    }
    ranges
}

fn batch_prompt(batch: &[Unit]) -> String {
    let described: Vec<String> = batch
        .iter()
        .enumerate()
        .map(|(i, unit)| describe_unit(&format!("Unit {}", i + 1), unit))
        .collect();
    format!(
        "Review these {} units of chat messages:\n\n{}\n\nReturn a decision for every unit.",
        batch.len(),
        described.join("\n\n")
    )
}

/// Where an atomic unit currently ends up.
#[derive(Debug, Clone)]
enum Slot {
    Kept,
    Split(Vec<ValidatedUnit>),
    /// Member of a merge group, by group id.
    Merged(usize),
}

/// Results map keyed by atomic unit index. Later batches overwrite earlier
/// conclusions; a merge group that loses members to a later batch shrinks,
/// and dissolves once fewer than two members remain, so no message is ever
/// placed twice.
struct Reconciler<'a> {
    originals: &'a [Unit],
    slots: Vec<Slot>,
    groups: BTreeMap<usize, Vec<usize>>,
    next_group: usize,
}

impl<'a> Reconciler<'a> {
    fn new(originals: &'a [Unit]) -> Self {
        Self {
            originals,
            slots: vec![Slot::Kept; originals.len()],
            groups: BTreeMap::new(),
            next_group: 0,
        }
    }

    fn apply_batch(&mut self, start: usize, len: usize, decisions: &[UnitDecision]) {
        let mut parent: Vec<usize> = (0..len).collect();
        let mut split_points: HashMap<usize, &[usize]> = HashMap::new();

        for decision in decisions {
            let Some(local) = decision.unit.and_then(|n| n.checked_sub(1)).filter(|&l| l < len)
            else {
                continue;
            };
            match decision.action() {
                UnitAction::Merge => {
                    for target in &decision.merge_with {
                        if let Some(other) = target.checked_sub(1).filter(|&t| t < len && t != local) {
                            union(&mut parent, local, other);
                        }
                    }
                }
                UnitAction::Split => {
                    split_points.insert(local, &decision.split_points);
                }
                UnitAction::Keep => {}
            }
        }

        let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for local in 0..len {
            let root = find(&mut parent, local);
            components.entry(root).or_default().push(local);
        }

        for members in components.into_values() {
            if members.len() > 1 {
                let group = self.next_group;
                self.next_group += 1;
                let indices: Vec<usize> = members.iter().map(|l| start + l).collect();
                for &index in &indices {
                    self.assign(index, Slot::Merged(group));
                }
                debug!(group, ?indices, "units merged");
                self.groups.insert(group, indices);
            } else {
                let local = members[0];
                let index = start + local;
                let slot = split_points
                    .get(&local)
                    .and_then(|points| self.split(index, points))
                    .map(Slot::Split)
                    .unwrap_or(Slot::Kept);
                self.assign(index, slot);
            }
        }
    }

    fn assign(&mut self, index: usize, slot: Slot) {
        if let Slot::Merged(old) = self.slots[index] {
            let same_group = matches!(slot, Slot::Merged(new) if new == old);
            if !same_group {
                self.leave_group(old, index);
            }
        }
        self.slots[index] = slot;
    }

    fn leave_group(&mut self, group: usize, index: usize) {
        let remaining = match self.groups.get_mut(&group) {
            Some(members) => {
                members.retain(|&m| m != index);
                members.len()
            }
            None => return,
        };
        if remaining < 2 {
            if let Some(orphans) = self.groups.remove(&group) {
                for orphan in orphans {
                    self.slots[orphan] = Slot::Kept;
                }
            }
        }
    }

    /// Slice a unit at 1-based message boundaries. `None` if no point is usable.
    fn split(&self, index: usize, points: &[usize]) -> Option<Vec<ValidatedUnit>> {
        let unit = &self.originals[index];
        let mut cuts: Vec<usize> = points
            .iter()
            .copied()
            .filter(|&p| p >= 1 && p < unit.len())
            .collect();
        cuts.sort_unstable();
        cuts.dedup();
        if cuts.is_empty() {
            return None;
        }

        let mut bounds = vec![0];
        bounds.extend(cuts);
        bounds.push(unit.len());
        Some(
            bounds
                .windows(2)
                .map(|w| ValidatedUnit {
                    unit: Unit::from_messages(index, unit.messages[w[0]..w[1]].to_vec()),
                    origin: UnitOrigin::Split {
                        split_from: index,
                        split_range: (w[0], w[1]),
                    },
                })
                .collect(),
        )
    }

    /// One entry per distinct stored key, in atomic index order, reindexed.
    fn finish(self) -> Vec<ValidatedUnit> {
        let mut out = Vec::with_capacity(self.originals.len());
        let mut emitted = HashSet::new();

        for (index, slot) in self.slots.iter().enumerate() {
            match slot {
                Slot::Kept => out.push(ValidatedUnit::original(self.originals[index].clone())),
                Slot::Split(parts) => out.extend(parts.iter().cloned()),
                Slot::Merged(group) => {
                    if !emitted.insert(*group) {
                        continue;
                    }
                    let parts: Vec<ValidatedUnit> = self.groups[group]
                        .iter()
                        .map(|&m| ValidatedUnit::original(self.originals[m].clone()))
                        .collect();
                    out.push(ValidatedUnit::merge(&parts));
                }
            }
        }
        reindex(out)
    }
}

fn find(parent: &mut [usize], x: usize) -> usize {
    let mut root = x;
    while parent[root] != root {
        root = parent[root];
    }
    let mut node = x;
    while parent[node] != root {
        let next = parent[node];
        parent[node] = root;
        node = next;
    }
    root
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let (ra, rb) = (find(parent, a), find(parent, b));
    if ra != rb {
        parent[ra.max(rb)] = ra.min(rb);
    }
}

fn reindex(units: Vec<ValidatedUnit>) -> Vec<ValidatedUnit> {
    units
        .into_iter()
        .enumerate()
        .map(|(i, mut v)| {
            v.unit = v.unit.reindexed(i);
            v
        })
        .collect()
}

/// Second pass over adjacent pairs; returns the collapsed units and calls made.
async fn merge_adjacent(
    oracle: &dyn Oracle,
    units: Vec<ValidatedUnit>,
    config: &ValidationConfig,
    pacer: &mut Pacer,
    failures: &mut Vec<OracleFailure>,
) -> (Vec<ValidatedUnit>, usize) {
    if units.len() < 2 {
        return (units, 0);
    }

    let pair_count = units.len() - 1;
    let per_call = config.pairs_per_call.max(1);
    let mut merge_forward = vec![false; pair_count];
    let mut calls = 0;

    for chunk_start in (0..pair_count).step_by(per_call) {
        let chunk = chunk_start..(chunk_start + per_call).min(pair_count);
        let prompt = pair_prompt(&units, chunk.clone());
        pacer.wait().await;
        calls += 1;

        match oracle::ask::<PairReply>(oracle, prompts::PAIR_SYSTEM, &prompt, config.budget).await {
            Ok(reply) => {
                for decision in reply.pairs.iter().filter(|d| d.merge) {
                    if let Some(local) = decision
                        .pair
                        .and_then(|p| p.checked_sub(1))
                        .filter(|&l| l < chunk.len())
                    {
                        merge_forward[chunk.start + local] = true;
                    }
                }
            }
            Err(error) => {
                warn!(pairs_from = chunk.start, %error, "pair check failed, no merges for chunk");
                failures.push(OracleFailure::new(
                    format!("adjacent-pair check (pairs {}-{})", chunk.start + 1, chunk.end),
                    error,
                ));
            }
        }
    }

    let merges = merge_forward.iter().filter(|m| **m).count();
    debug!(pairs = pair_count, merges, "adjacent pairs checked");
    (collapse_chains(&units, &merge_forward), calls)
}

fn pair_prompt(units: &[ValidatedUnit], pairs: Range<usize>) -> String {
    let described: Vec<String> = pairs
        .enumerate()
        .map(|(n, i)| {
            format!(
                "=== Pair {} ===\n{}\n\n{}",
                n + 1,
                describe_unit("First", &units[i].unit),
                describe_unit("Second", &units[i + 1].unit)
            )
        })
        .collect();
    format!(
        "For each pair, should the two adjacent units be one exchange?\n\n{}",
        described.join("\n\n")
    )
}

/// Follow forward merges: unit i joins i+1 joins i+2 ... until the chain breaks.
fn collapse_chains(units: &[ValidatedUnit], merge_forward: &[bool]) -> Vec<ValidatedUnit> {
    let mut out = Vec::with_capacity(units.len());
    let mut i = 0;
    while i < units.len() {
        let mut j = i;
        while j < merge_forward.len() && merge_forward[j] {
            j += 1;
        }
        if j == i {
            out.push(units[i].clone());
        } else {
            out.push(ValidatedUnit::merge(&units[i..=j]));
        }
        i = j + 1;
    }
    reindex(out)
}
