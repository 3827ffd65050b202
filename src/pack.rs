//! Palette packing: assigning tile color sets to as few fixed-capacity
//! palettes as possible.
//!
//! This is a set-cover flavored bin packing problem ("pagination"): each
//! palette must hold the union of every color set mapped to it, and that
//! union may not exceed the capacity. The solver is a best-fit heuristic
//! with local repair, dubbed overload-and-remove: place sets greedily where
//! they overlap the most, then repeatedly evict any set whose removal
//! shrinks its palette and that fits somewhere else.

use std::collections::BTreeSet;

use crate::color::GbColor;
use crate::color_set::ColorSet;

/// One palette being assembled: the indices of the color sets assigned to
/// it. The color union is always recomputed from the members, so evictions
/// cannot leave stale colors behind.
#[derive(Debug, Default, Clone)]
struct Bin {
    members: Vec<usize>,
}

impl Bin {
    fn union(&self, sets: &[ColorSet]) -> BTreeSet<GbColor> {
        let mut colors = BTreeSet::new();
        for &m in &self.members {
            colors.extend(sets[m].iter());
        }
        colors
    }

    fn union_len(&self, sets: &[ColorSet]) -> usize {
        self.union(sets).len()
    }

    fn union_len_with(&self, sets: &[ColorSet], extra: &ColorSet) -> usize {
        let mut colors = self.union(sets);
        colors.extend(extra.iter());
        colors.len()
    }

    fn union_len_without(&self, sets: &[ColorSet], evicted: usize) -> usize {
        let mut colors = BTreeSet::new();
        for &m in &self.members {
            if m != evicted {
                colors.extend(sets[m].iter());
            }
        }
        colors.len()
    }

    fn overlap(&self, sets: &[ColorSet], other: &ColorSet) -> usize {
        let colors = self.union(sets);
        other.iter().filter(|c| colors.contains(c)).count()
    }
}

/// Packs `sets` into palettes of at most `capacity` colors each.
///
/// Returns the palette index assigned to each input set, and the number of
/// palettes used. The seeding order is total, so the result is reproducible
/// run to run: larger sets first, then sets whose colors are rarest across
/// the whole input, then lexicographic color order.
pub fn overload_and_remove(sets: &[ColorSet], capacity: usize) -> (Vec<usize>, usize) {
    if sets.is_empty() {
        return (Vec::new(), 0);
    }

    let order = seed_order(sets);
    let mut bins: Vec<Bin> = Vec::new();
    let mut assignment = vec![usize::MAX; sets.len()];

    for &idx in &order {
        let set = &sets[idx];

        // Best fit: among bins the set fits into, maximize overlap with the
        // bin's current union, breaking ties toward the lowest bin index.
        let mut best: Option<(usize, usize)> = None;
        for (j, bin) in bins.iter().enumerate() {
            if bin.union_len_with(sets, set) > capacity {
                continue;
            }
            let overlap = bin.overlap(sets, set);
            if best.map_or(true, |(_, best_overlap)| overlap > best_overlap) {
                best = Some((j, overlap));
            }
        }

        let fused = match best {
            Some((j, overlap)) => {
                bins[j].members.push(idx);
                assignment[idx] = j;
                // Placing a disjoint set next to existing members merges two
                // clusters; that is when evictions can start paying off.
                overlap < set.len() || bins[j].union_len(sets) >= capacity
            }
            None => {
                bins.push(Bin {
                    members: vec![idx],
                });
                assignment[idx] = bins.len() - 1;
                false
            }
        };

        if fused {
            repair(sets, capacity, &mut bins, &mut assignment);
        }
    }

    // One last pass, in case the final placements opened up moves.
    repair(sets, capacity, &mut bins, &mut assignment);

    compact(&mut bins, &mut assignment);
    (assignment, bins.len())
}

/// Total seeding order: size descending, then uniqueness score descending
/// (colors appearing in no other set), then lexicographic color tuple, then
/// input position.
fn seed_order(sets: &[ColorSet]) -> Vec<usize> {
    let uniqueness: Vec<usize> = sets
        .iter()
        .enumerate()
        .map(|(i, set)| {
            set.iter()
                .filter(|&c| {
                    sets.iter()
                        .enumerate()
                        .all(|(j, other)| j == i || !other.contains(c))
                })
                .count()
        })
        .collect();

    let mut order: Vec<usize> = (0..sets.len()).collect();
    order.sort_by(|&a, &b| {
        sets[b]
            .len()
            .cmp(&sets[a].len())
            .then(uniqueness[b].cmp(&uniqueness[a]))
            .then(sets[a].cmp(&sets[b]))
            .then(a.cmp(&b))
    });
    order
}

/// Eviction loop: move any set out of a bin if that strictly shrinks the
/// bin's union and the set fits elsewhere. Of all candidate moves, performs
/// the one maximizing total free capacity, and repeats until no move
/// improves anything. Free capacity strictly increases with each move, so
/// the loop terminates.
fn repair(sets: &[ColorSet], capacity: usize, bins: &mut Vec<Bin>, assignment: &mut [usize]) {
    loop {
        let current_free = free_capacity(sets, capacity, bins);
        let mut best_move: Option<(usize, usize, usize, usize)> = None; // (set, from, to, free)

        for (from, bin) in bins.iter().enumerate() {
            for &member in &bin.members {
                if bin.union_len_without(sets, member) >= bin.union_len(sets) {
                    continue;
                }
                for (to, target) in bins.iter().enumerate() {
                    if to == from {
                        continue;
                    }
                    if target.union_len_with(sets, &sets[member]) > capacity {
                        continue;
                    }
                    let free = free_after_move(sets, capacity, bins, member, from, to);
                    if free > current_free
                        && best_move.map_or(true, |(.., best_free)| free > best_free)
                    {
                        best_move = Some((member, from, to, free));
                    }
                }
            }
        }

        let Some((member, from, to, _)) = best_move else {
            break;
        };
        bins[from].members.retain(|&m| m != member);
        bins[to].members.push(member);
        assignment[member] = to;
    }
}

fn free_capacity(sets: &[ColorSet], capacity: usize, bins: &[Bin]) -> usize {
    bins.iter()
        .map(|bin| capacity - bin.union_len(sets).min(capacity))
        .sum()
}

fn free_after_move(
    sets: &[ColorSet],
    capacity: usize,
    bins: &[Bin],
    member: usize,
    from: usize,
    to: usize,
) -> usize {
    bins.iter()
        .enumerate()
        .map(|(j, bin)| {
            let used = if j == from {
                bin.union_len_without(sets, member)
            } else if j == to {
                bin.union_len_with(sets, &sets[member])
            } else {
                bin.union_len(sets)
            };
            capacity - used.min(capacity)
        })
        .sum()
}

/// Drops bins that repair emptied out and renumbers the assignment densely.
fn compact(bins: &mut Vec<Bin>, assignment: &mut [usize]) {
    let mut remap = vec![usize::MAX; bins.len()];
    let mut next = 0;
    for (j, bin) in bins.iter().enumerate() {
        if !bin.members.is_empty() {
            remap[j] = next;
            next += 1;
        }
    }
    bins.retain(|bin| !bin.members.is_empty());
    for slot in assignment.iter_mut() {
        *slot = remap[*slot];
    }
}
