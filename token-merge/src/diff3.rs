//! Three-way token merge (diff3 algorithm).
//!
//! Follows the xdiff merge behind `git merge-file --diff3`, run over token
//! sequences instead of lines:
//!
//! 1. Diff base→ours and base→theirs with xdiff's Myers variant: common
//!    prefix and suffix trimmed, tokens absent from the other side (and
//!    isolated frequent ones) discarded up front, then a divide-and-conquer
//!    middle-snake search.
//! 2. Compact every change group the way xdiff does: slide it as far down
//!    as equal tokens allow, or back up to line up with a change on the
//!    other side.
//! 3. Walk both change scripts together. A change on one side only is taken
//!    from that side. Changes that overlap or touch in the base conflict,
//!    unless both sides made exactly the same change.
//!
//! Stable text between changes is taken from ours.

use std::collections::HashMap;

use crate::merge::{MergeError, ThreeWayMerger};
use crate::types::{MergeRegion, MergeResult, Token, TokenStream};

/// Upper bound on the multimatch threshold when discarding tokens.
const MAX_EQ_LIMIT: usize = 1024;
/// How far to scan around a multimatch token when deciding to discard it.
const SIMSCAN_WINDOW: usize = 100;
const KPDIS_RUN: usize = 4;
const MAX_COST_MIN: isize = 256;
const HEUR_MIN_COST: isize = 256;
const SNAKE_CNT: isize = 20;
const K_HEUR: isize = 4;

/// A classified span of the three-way merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diff3Hunk {
    /// Unchanged on both sides, or changed identically on both.
    Stable(Vec<Token>),
    /// Only ours changed from base.
    OursChanged(Vec<Token>),
    /// Only theirs changed from base.
    TheirsChanged(Vec<Token>),
    /// Both changed differently.
    Conflict {
        ours: Vec<Token>,
        base: Vec<Token>,
        theirs: Vec<Token>,
    },
}

/// In-process diff3 merger. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct Diff3Merger;

impl ThreeWayMerger for Diff3Merger {
    fn merge(
        &self,
        ours: &TokenStream,
        base: &TokenStream,
        theirs: &TokenStream,
    ) -> Result<MergeResult, MergeError> {
        Ok(diff3_merge(ours.tokens(), base.tokens(), theirs.tokens()))
    }
}

/// Merge three token sequences into regions.
pub fn diff3_merge(ours: &[Token], base: &[Token], theirs: &[Token]) -> MergeResult {
    MergeResult::new(diff3_hunks(ours, base, theirs).into_iter().map(|hunk| match hunk {
        Diff3Hunk::Stable(tokens)
        | Diff3Hunk::OursChanged(tokens)
        | Diff3Hunk::TheirsChanged(tokens) => MergeRegion::Stable(tokens),
        Diff3Hunk::Conflict { ours, base, theirs } => MergeRegion::Conflict { ours, base, theirs },
    }))
}

/// Run a three-way merge and return the classified hunks in order.
pub fn diff3_hunks(ours: &[Token], base: &[Token], theirs: &[Token]) -> Vec<Diff3Hunk> {
    let ours_script = diff_script(base, ours);
    let theirs_script = diff_script(base, theirs);
    let spans = merge_scripts(&ours_script, &theirs_script, ours, theirs, base.len());

    let mut hunks = Vec::new();
    let mut next = 0isize;
    for span in &spans {
        hunks.push(Diff3Hunk::Stable(slice(ours, next, span.ours.0 - next)));
        hunks.push(match span.pick {
            Pick::Ours => Diff3Hunk::OursChanged(slice(ours, span.ours.0, span.ours.1)),
            Pick::Theirs => Diff3Hunk::TheirsChanged(slice(theirs, span.theirs.0, span.theirs.1)),
            Pick::Conflict => Diff3Hunk::Conflict {
                ours: slice(ours, span.ours.0, span.ours.1),
                base: slice(base, span.base.0, span.base.1),
                theirs: slice(theirs, span.theirs.0, span.theirs.1),
            },
        });
        next = span.ours.0 + span.ours.1;
    }
    hunks.push(Diff3Hunk::Stable(slice(ours, next, ours.len() as isize - next)));

    coalesce_hunks(hunks)
}

fn slice(tokens: &[Token], start: isize, len: isize) -> Vec<Token> {
    let n = tokens.len() as isize;
    let start = start.clamp(0, n);
    let end = (start + len).clamp(start, n);
    tokens[start as usize..end as usize].to_vec()
}

fn coalesce_hunks(hunks: Vec<Diff3Hunk>) -> Vec<Diff3Hunk> {
    let mut result: Vec<Diff3Hunk> = Vec::new();
    for hunk in hunks {
        match (result.last_mut(), hunk) {
            (_, Diff3Hunk::Stable(new)) if new.is_empty() => {}
            (Some(Diff3Hunk::Stable(existing)), Diff3Hunk::Stable(new)) => existing.extend(new),
            (_, hunk) => result.push(hunk),
        }
    }
    result
}

/// One change group: `len.0` base tokens at `start.0` became `len.1` side
/// tokens at `start.1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Change {
    base_start: isize,
    base_len: isize,
    side_start: isize,
    side_len: isize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pick {
    Ours,
    Theirs,
    Conflict,
}

/// A merged change span as `(start, len)` in each sequence.
#[derive(Debug, Clone, Copy)]
struct MergeSpan {
    pick: Pick,
    base: (isize, isize),
    ours: (isize, isize),
    theirs: (isize, isize),
}

fn append_span(spans: &mut Vec<MergeSpan>, span: MergeSpan) {
    if let Some(last) = spans.last_mut() {
        if span.ours.0 <= last.ours.0 + last.ours.1 || span.theirs.0 <= last.theirs.0 + last.theirs.1
        {
            if span.pick != last.pick {
                last.pick = Pick::Conflict;
            }
            last.base.1 = span.base.0 + span.base.1 - last.base.0;
            last.ours.1 = span.ours.0 + span.ours.1 - last.ours.0;
            last.theirs.1 = span.theirs.0 + span.theirs.1 - last.theirs.0;
            return;
        }
    }
    spans.push(span);
}

/// Walk the base→ours and base→theirs scripts in base order.
fn merge_scripts(
    ours_script: &[Change],
    theirs_script: &[Change],
    ours: &[Token],
    theirs: &[Token],
    base_len: usize,
) -> Vec<MergeSpan> {
    let base_len = base_len as isize;
    let mut spans = Vec::new();
    let (mut p, mut q) = (0, 0);

    while p < ours_script.len() && q < theirs_script.len() {
        let c1 = ours_script[p];
        let c2 = theirs_script[q];
        if c1.base_start + c1.base_len < c2.base_start {
            append_span(
                &mut spans,
                MergeSpan {
                    pick: Pick::Ours,
                    base: (c1.base_start, c1.base_len),
                    ours: (c1.side_start, c1.side_len),
                    theirs: (c2.side_start - c2.base_start + c1.base_start, c1.base_len),
                },
            );
            p += 1;
            continue;
        }
        if c2.base_start + c2.base_len < c1.base_start {
            append_span(
                &mut spans,
                MergeSpan {
                    pick: Pick::Theirs,
                    base: (c2.base_start, c2.base_len),
                    ours: (c1.side_start - c1.base_start + c2.base_start, c2.base_len),
                    theirs: (c2.side_start, c2.side_len),
                },
            );
            q += 1;
            continue;
        }

        let same_change = c1.base_start == c2.base_start
            && c1.base_len == c2.base_len
            && c1.side_len == c2.side_len
            && slice(ours, c1.side_start, c1.side_len) == slice(theirs, c2.side_start, c2.side_len);
        if !same_change {
            // Widen both sides to the union of the two base ranges.
            let off = c1.base_start - c2.base_start;
            let ffo = off + c1.base_len - c2.base_len;
            let (mut i0, mut i1, mut i2) = (c1.base_start, c1.side_start, c2.side_start);
            if off > 0 {
                i0 -= off;
                i1 -= off;
            } else {
                i2 += off;
            }
            let mut chg0 = c1.base_start + c1.base_len - i0;
            let mut chg1 = c1.side_start + c1.side_len - i1;
            let mut chg2 = c2.side_start + c2.side_len - i2;
            if ffo < 0 {
                chg0 -= ffo;
                chg1 -= ffo;
            } else {
                chg2 += ffo;
            }
            append_span(
                &mut spans,
                MergeSpan {
                    pick: Pick::Conflict,
                    base: (i0, chg0),
                    ours: (i1, chg1),
                    theirs: (i2, chg2),
                },
            );
        }

        let end1 = c1.base_start + c1.base_len;
        let end2 = c2.base_start + c2.base_len;
        if end1 >= end2 {
            q += 1;
        }
        if end2 >= end1 {
            p += 1;
        }
    }

    for c1 in &ours_script[p..] {
        append_span(
            &mut spans,
            MergeSpan {
                pick: Pick::Ours,
                base: (c1.base_start, c1.base_len),
                ours: (c1.side_start, c1.side_len),
                theirs: (c1.base_start + theirs.len() as isize - base_len, c1.base_len),
            },
        );
    }
    for c2 in &theirs_script[q..] {
        append_span(
            &mut spans,
            MergeSpan {
                pick: Pick::Theirs,
                base: (c2.base_start, c2.base_len),
                ours: (c2.base_start + ours.len() as isize - base_len, c2.base_len),
                theirs: (c2.side_start, c2.side_len),
            },
        );
    }
    spans
}

/// Assigns every distinct token a class id and counts it per side.
#[derive(Default)]
struct Classifier<'a> {
    ids: HashMap<&'a Token, usize>,
    counts: Vec<[usize; 2]>,
}

impl<'a> Classifier<'a> {
    fn classify(&mut self, tokens: &'a [Token], side: usize) -> Vec<usize> {
        tokens
            .iter()
            .map(|token| {
                let next = self.ids.len();
                let id = *self.ids.entry(token).or_insert(next);
                if id == self.counts.len() {
                    self.counts.push([0, 0]);
                }
                self.counts[id][side] += 1;
                id
            })
            .collect()
    }
}

/// One side of a diff: token classes plus the changed flags.
struct DiffSide {
    classes: Vec<usize>,
    /// `changed[i + 1]` flags token `i`; both ends are always false.
    changed: Vec<bool>,
}

impl DiffSide {
    fn new(classes: Vec<usize>) -> Self {
        let changed = vec![false; classes.len() + 2];
        Self { classes, changed }
    }

    fn len(&self) -> usize {
        self.classes.len()
    }

    fn is_changed(&self, i: usize) -> bool {
        self.changed[i + 1]
    }

    fn set_changed(&mut self, i: usize, changed: bool) {
        self.changed[i + 1] = changed;
    }

    /// Whether the token before `i` is changed. False at the start.
    fn changed_before(&self, i: usize) -> bool {
        self.changed[i]
    }
}

/// Diff `base` against `side` and return the compacted change script.
fn diff_script(base: &[Token], side: &[Token]) -> Vec<Change> {
    let mut classifier = Classifier::default();
    let mut old = DiffSide::new(classifier.classify(base, 0));
    let mut new = DiffSide::new(classifier.classify(side, 1));
    let counts = classifier.counts;

    let (n1, n2) = (old.len(), new.len());
    let lim = n1.min(n2);
    let mut head = 0;
    while head < lim && old.classes[head] == new.classes[head] {
        head += 1;
    }
    let mut tail = 0;
    while tail < lim - head && old.classes[n1 - 1 - tail] == new.classes[n2 - 1 - tail] {
        tail += 1;
    }

    let (a, a_index) = discard(&mut old, head, n1 - tail, |class| counts[class][1]);
    let (b, b_index) = discard(&mut new, head, n2 - tail, |class| counts[class][0]);

    let mut myers = Myers::new(&a, &b);
    myers.compare();
    for (i, &changed) in myers.a_changed.iter().enumerate() {
        if changed {
            old.set_changed(a_index[i], true);
        }
    }
    for (j, &changed) in myers.b_changed.iter().enumerate() {
        if changed {
            new.set_changed(b_index[j], true);
        }
    }

    compact(&mut old, &new);
    compact(&mut new, &old);
    build_script(&old, &new)
}

fn bogosqrt(mut n: usize) -> usize {
    let mut i = 1;
    while n > 0 {
        i <<= 1;
        n >>= 2;
    }
    i
}

/// Mark tokens in `start..end` that can never match as changed. Returns the
/// classes left for the core diff and their original positions.
fn discard(
    side: &mut DiffSide,
    start: usize,
    end: usize,
    matches_in_other: impl Fn(usize) -> usize,
) -> (Vec<usize>, Vec<usize>) {
    let mlim = bogosqrt(side.len()).min(MAX_EQ_LIMIT);
    let mut dis = vec![0u8; side.len()];
    for i in start..end {
        let nm = matches_in_other(side.classes[i]);
        dis[i] = match nm {
            0 => 0,
            nm if nm >= mlim => 2,
            _ => 1,
        };
    }

    let mut classes = Vec::new();
    let mut index = Vec::new();
    for i in start..end {
        if dis[i] == 1 || (dis[i] == 2 && !is_isolated_multimatch(&dis, i, start, end - 1)) {
            classes.push(side.classes[i]);
            index.push(i);
        } else {
            side.set_changed(i, true);
        }
    }
    (classes, index)
}

/// A frequent token is discarded only when it sits inside a run dominated
/// by tokens with no match at all.
fn is_isolated_multimatch(dis: &[u8], i: usize, start: usize, last: usize) -> bool {
    let s = start.max(i.saturating_sub(SIMSCAN_WINDOW));
    let e = last.min(i + SIMSCAN_WINDOW);

    let (mut unmatched_before, mut multi_before) = (0, 1);
    for r in 1..=(i - s) {
        match dis[i - r] {
            0 => unmatched_before += 1,
            2 => multi_before += 1,
            _ => break,
        }
    }
    if unmatched_before == 0 {
        return false;
    }
    let (mut unmatched_after, mut multi_after) = (0, 1);
    for r in 1..=(e.saturating_sub(i)) {
        match dis[i + r] {
            0 => unmatched_after += 1,
            2 => multi_after += 1,
            _ => break,
        }
    }
    if unmatched_after == 0 {
        return false;
    }
    let unmatched = unmatched_before + unmatched_after;
    let multi = multi_before + multi_after;
    multi * KPDIS_RUN < multi + unmatched
}

/// Where a box gets divided and whether each half needs a minimal diff.
struct Split {
    i1: isize,
    i2: isize,
    min_lo: bool,
    min_hi: bool,
}

/// Divide-and-conquer Myers diff over class ids.
struct Myers<'a> {
    a: &'a [usize],
    b: &'a [usize],
    a_changed: Vec<bool>,
    b_changed: Vec<bool>,
    forward: Vec<isize>,
    backward: Vec<isize>,
    /// Index of diagonal 0 in `forward` and `backward`.
    origin: isize,
    max_cost: isize,
}

impl<'a> Myers<'a> {
    fn new(a: &'a [usize], b: &'a [usize]) -> Self {
        let diagonals = a.len() + b.len() + 3;
        Self {
            a,
            b,
            a_changed: vec![false; a.len()],
            b_changed: vec![false; b.len()],
            forward: vec![0; diagonals],
            backward: vec![0; diagonals],
            origin: b.len() as isize + 1,
            max_cost: (bogosqrt(diagonals) as isize).max(MAX_COST_MIN),
        }
    }

    fn same(&self, i1: isize, i2: isize) -> bool {
        i1 >= 0
            && i2 >= 0
            && matches!(
                (self.a.get(i1 as usize), self.b.get(i2 as usize)),
                (Some(x), Some(y)) if x == y
            )
    }

    fn fwd(&self, d: isize) -> isize {
        self.forward[(d + self.origin) as usize]
    }

    fn set_fwd(&mut self, d: isize, v: isize) {
        self.forward[(d + self.origin) as usize] = v;
    }

    fn bwd(&self, d: isize) -> isize {
        self.backward[(d + self.origin) as usize]
    }

    fn set_bwd(&mut self, d: isize, v: isize) {
        self.backward[(d + self.origin) as usize] = v;
    }

    fn compare(&mut self) {
        let mut pending = vec![(0isize, self.a.len() as isize, 0isize, self.b.len() as isize, false)];
        while let Some((mut off1, mut lim1, mut off2, mut lim2, need_min)) = pending.pop() {
            while off1 < lim1 && off2 < lim2 && self.same(off1, off2) {
                off1 += 1;
                off2 += 1;
            }
            while off1 < lim1 && off2 < lim2 && self.same(lim1 - 1, lim2 - 1) {
                lim1 -= 1;
                lim2 -= 1;
            }

            if off1 == lim1 {
                for j in off2..lim2 {
                    self.b_changed[j as usize] = true;
                }
            } else if off2 == lim2 {
                for i in off1..lim1 {
                    self.a_changed[i as usize] = true;
                }
            } else {
                let split = self.split(off1, lim1, off2, lim2, need_min);
                // low half first, as the recursive form would
                pending.push((split.i1, lim1, split.i2, lim2, split.min_hi));
                pending.push((off1, split.i1, off2, split.i2, split.min_lo));
            }
        }
    }

    fn split(&mut self, off1: isize, lim1: isize, off2: isize, lim2: isize, need_min: bool) -> Split {
        let dmin = off1 - lim2;
        let dmax = lim1 - off2;
        let fmid = off1 - off2;
        let bmid = lim1 - lim2;
        let odd = (fmid - bmid) & 1 != 0;
        let (mut fmin, mut fmax) = (fmid, fmid);
        let (mut bmin, mut bmax) = (bmid, bmid);

        self.set_fwd(fmid, off1);
        self.set_bwd(bmid, lim1);

        let mut ec: isize = 1;
        loop {
            let mut got_snake = false;

            if fmin > dmin {
                fmin -= 1;
                self.set_fwd(fmin - 1, -1);
            } else {
                fmin += 1;
            }
            if fmax < dmax {
                fmax += 1;
                self.set_fwd(fmax + 1, -1);
            } else {
                fmax -= 1;
            }

            let mut d = fmax;
            while d >= fmin {
                let mut i1 = if self.fwd(d - 1) >= self.fwd(d + 1) {
                    self.fwd(d - 1) + 1
                } else {
                    self.fwd(d + 1)
                };
                let prev1 = i1;
                let mut i2 = i1 - d;
                while i1 < lim1 && i2 < lim2 && self.same(i1, i2) {
                    i1 += 1;
                    i2 += 1;
                }
                if i1 - prev1 > SNAKE_CNT {
                    got_snake = true;
                }
                self.set_fwd(d, i1);
                if odd && bmin <= d && d <= bmax && self.bwd(d) <= i1 {
                    return Split { i1, i2, min_lo: true, min_hi: true };
                }
                d -= 2;
            }

            if bmin > dmin {
                bmin -= 1;
                self.set_bwd(bmin - 1, isize::MAX);
            } else {
                bmin += 1;
            }
            if bmax < dmax {
                bmax += 1;
                self.set_bwd(bmax + 1, isize::MAX);
            } else {
                bmax -= 1;
            }

            let mut d = bmax;
            while d >= bmin {
                let mut i1 = if self.bwd(d - 1) < self.bwd(d + 1) {
                    self.bwd(d - 1)
                } else {
                    self.bwd(d + 1) - 1
                };
                let prev1 = i1;
                let mut i2 = i1 - d;
                while i1 > off1 && i2 > off2 && self.same(i1 - 1, i2 - 1) {
                    i1 -= 1;
                    i2 -= 1;
                }
                if prev1 - i1 > SNAKE_CNT {
                    got_snake = true;
                }
                self.set_bwd(d, i1);
                if !odd && fmin <= d && d <= fmax && i1 <= self.fwd(d) {
                    return Split { i1, i2, min_lo: true, min_hi: true };
                }
                d -= 2;
            }

            if need_min {
                ec += 1;
                continue;
            }

            if got_snake && ec > HEUR_MIN_COST {
                if let Some(split) = self.forward_heuristic(off1, lim1, off2, lim2, fmin, fmax, fmid, ec) {
                    return split;
                }
                if let Some(split) = self.backward_heuristic(off1, lim1, off2, lim2, bmin, bmax, bmid, ec) {
                    return split;
                }
            }

            if ec >= self.max_cost {
                return self.furthest_split(off1, lim1, off2, lim2, fmin, fmax, bmin, bmax);
            }
            ec += 1;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn forward_heuristic(
        &self,
        off1: isize,
        lim1: isize,
        off2: isize,
        lim2: isize,
        fmin: isize,
        fmax: isize,
        fmid: isize,
        ec: isize,
    ) -> Option<Split> {
        let mut best = 0;
        let mut found = None;
        let mut d = fmax;
        while d >= fmin {
            let dd = (d - fmid).abs();
            let i1 = self.fwd(d);
            let i2 = i1 - d;
            let v = (i1 - off1) + (i2 - off2) - dd;
            if v > K_HEUR * ec
                && v > best
                && off1 + SNAKE_CNT <= i1
                && i1 < lim1
                && off2 + SNAKE_CNT <= i2
                && i2 < lim2
            {
                let mut k = 1;
                while self.same(i1 - k, i2 - k) {
                    if k == SNAKE_CNT {
                        best = v;
                        found = Some((i1, i2));
                        break;
                    }
                    k += 1;
                }
            }
            d -= 2;
        }
        found.map(|(i1, i2)| Split { i1, i2, min_lo: true, min_hi: false })
    }

    #[allow(clippy::too_many_arguments)]
    fn backward_heuristic(
        &self,
        off1: isize,
        lim1: isize,
        off2: isize,
        lim2: isize,
        bmin: isize,
        bmax: isize,
        bmid: isize,
        ec: isize,
    ) -> Option<Split> {
        let mut best = 0;
        let mut found = None;
        let mut d = bmax;
        while d >= bmin {
            let dd = (d - bmid).abs();
            let i1 = self.bwd(d);
            let i2 = i1 - d;
            let v = (lim1 - i1) + (lim2 - i2) - dd;
            if v > K_HEUR * ec
                && v > best
                && off1 < i1
                && i1 <= lim1 - SNAKE_CNT
                && off2 < i2
                && i2 <= lim2 - SNAKE_CNT
            {
                let mut k = 0;
                while self.same(i1 + k, i2 + k) {
                    if k == SNAKE_CNT - 1 {
                        best = v;
                        found = Some((i1, i2));
                        break;
                    }
                    k += 1;
                }
            }
            d -= 2;
        }
        found.map(|(i1, i2)| Split { i1, i2, min_lo: false, min_hi: true })
    }

    /// Give up on a minimal path and split at the furthest-reaching point.
    #[allow(clippy::too_many_arguments)]
    fn furthest_split(
        &self,
        off1: isize,
        lim1: isize,
        off2: isize,
        lim2: isize,
        fmin: isize,
        fmax: isize,
        bmin: isize,
        bmax: isize,
    ) -> Split {
        let (mut fbest, mut fbest1) = (-1, -1);
        let mut d = fmax;
        while d >= fmin {
            let mut i1 = self.fwd(d).min(lim1);
            let mut i2 = i1 - d;
            if lim2 < i2 {
                i1 = lim2 + d;
                i2 = lim2;
            }
            if fbest < i1 + i2 {
                fbest = i1 + i2;
                fbest1 = i1;
            }
            d -= 2;
        }

        let (mut bbest, mut bbest1) = (isize::MAX, isize::MAX);
        let mut d = bmax;
        while d >= bmin {
            let mut i1 = self.bwd(d).max(off1);
            let mut i2 = i1 - d;
            if i2 < off2 {
                i1 = off2 + d;
                i2 = off2;
            }
            if i1 + i2 < bbest {
                bbest = i1 + i2;
                bbest1 = i1;
            }
            d -= 2;
        }

        if (lim1 + lim2) - bbest < fbest - (off1 + off2) {
            Split { i1: fbest1, i2: fbest - fbest1, min_lo: true, min_hi: false }
        } else {
            Split { i1: bbest1, i2: bbest - bbest1, min_lo: false, min_hi: true }
        }
    }
}

/// A run of changed tokens `start..end`, possibly empty.
#[derive(Debug, Clone, Copy)]
struct Group {
    start: usize,
    end: usize,
}

impl Group {
    fn first(side: &DiffSide) -> Self {
        let mut end = 0;
        while side.is_changed(end) {
            end += 1;
        }
        Self { start: 0, end }
    }

    fn is_empty(&self) -> bool {
        self.start == self.end
    }

    fn next(&mut self, side: &DiffSide) -> bool {
        if self.end == side.len() {
            return false;
        }
        self.start = self.end + 1;
        self.end = self.start;
        while side.is_changed(self.end) {
            self.end += 1;
        }
        true
    }

    fn previous(&mut self, side: &DiffSide) -> bool {
        if self.start == 0 {
            return false;
        }
        self.end = self.start - 1;
        self.start = self.end;
        while side.changed_before(self.start) {
            self.start -= 1;
        }
        true
    }

    fn slide_up(&mut self, side: &mut DiffSide) -> bool {
        if self.start == 0 || side.classes[self.start - 1] != side.classes[self.end - 1] {
            return false;
        }
        self.start -= 1;
        side.set_changed(self.start, true);
        self.end -= 1;
        side.set_changed(self.end, false);
        while side.changed_before(self.start) {
            self.start -= 1;
        }
        true
    }

    fn slide_down(&mut self, side: &mut DiffSide) -> bool {
        if self.end == side.len() || side.classes[self.start] != side.classes[self.end] {
            return false;
        }
        side.set_changed(self.start, false);
        self.start += 1;
        side.set_changed(self.end, true);
        self.end += 1;
        while side.is_changed(self.end) {
            self.end += 1;
        }
        true
    }
}

/// Slide each change group of `side` as far down as it goes, merging groups
/// it runs into, then back up if that lines it up with a change in `other`.
fn compact(side: &mut DiffSide, other: &DiffSide) {
    let mut g = Group::first(side);
    let mut go = Group::first(other);

    loop {
        if !g.is_empty() {
            let (earliest_end, aligned) = loop {
                let size = g.end - g.start;
                let mut aligned = false;

                while g.slide_up(side) {
                    go.previous(other);
                }
                let earliest_end = g.end;
                if !go.is_empty() {
                    aligned = true;
                }

                while g.slide_down(side) {
                    go.next(other);
                    if !go.is_empty() {
                        aligned = true;
                    }
                }

                if size == g.end - g.start {
                    break (earliest_end, aligned);
                }
            };

            if g.end != earliest_end && aligned {
                while go.is_empty() {
                    if !g.slide_up(side) || !go.previous(other) {
                        break;
                    }
                }
            }
        }

        if !g.next(side) {
            break;
        }
        go.next(other);
    }
}

fn build_script(old: &DiffSide, new: &DiffSide) -> Vec<Change> {
    let marked = |side: &DiffSide, i: isize| i > 0 && side.changed_before(i as usize);
    let mut script = Vec::new();
    let (mut i1, mut i2) = (old.len() as isize, new.len() as isize);

    while i1 >= 0 || i2 >= 0 {
        if marked(old, i1) || marked(new, i2) {
            let (l1, l2) = (i1, i2);
            while marked(old, i1) {
                i1 -= 1;
            }
            while marked(new, i2) {
                i2 -= 1;
            }
            script.push(Change {
                base_start: i1,
                base_len: l1 - i1,
                side_start: i2,
                side_len: l2 - i2,
            });
        }
        i1 -= 1;
        i2 -= 1;
    }

    script.reverse();
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<Token> {
        s.split_whitespace()
            .map(|w| if w == "⏎" { Token::LineBreak } else { Token::text(w) })
            .collect()
    }

    #[test]
    fn test_identity_merge() {
        let t = toks("int x = 1 ; ⏎ return x ;");
        let result = diff3_merge(&t, &t, &t);
        assert_eq!(result.regions(), &[MergeRegion::Stable(t.clone())]);
    }

    #[test]
    fn test_only_ours_changed() {
        let result = diff3_merge(&toks("int x = 1 ;"), &toks("int x = 0 ;"), &toks("int x = 0 ;"));
        assert_eq!(result.regions(), &[MergeRegion::Stable(toks("int x = 1 ;"))]);
    }

    #[test]
    fn test_only_theirs_changed() {
        let result = diff3_merge(&toks("a b c"), &toks("a b c"), &toks("a B c d"));
        assert_eq!(result.regions(), &[MergeRegion::Stable(toks("a B c d"))]);
    }

    #[test]
    fn test_identical_changes_do_not_conflict() {
        let result = diff3_merge(&toks("f ( y )"), &toks("f ( x )"), &toks("f ( y )"));
        assert!(!result.has_conflicts());
        assert_eq!(result.regions(), &[MergeRegion::Stable(toks("f ( y )"))]);
    }

    #[test]
    fn test_conflict_detection() {
        let result = diff3_merge(&toks("return a ;"), &toks("return 0 ;"), &toks("return b ;"));
        assert_eq!(
            result.regions(),
            &[
                MergeRegion::Stable(toks("return")),
                MergeRegion::Conflict {
                    ours: toks("a"),
                    base: toks("0"),
                    theirs: toks("b"),
                },
                MergeRegion::Stable(toks(";")),
            ]
        );
    }

    #[test]
    fn test_non_overlapping_changes_merge() {
        let result = diff3_merge(
            &toks("A b c d e"),
            &toks("a b c d e"),
            &toks("a b c d E"),
        );
        assert_eq!(result.regions(), &[MergeRegion::Stable(toks("A b c d E"))]);
    }

    #[test]
    fn test_adjacent_changes_conflict() {
        let result = diff3_merge(&toks("x b c"), &toks("a b c"), &toks("a y c"));
        assert_eq!(result.conflict_count(), 1);
        let (ours, base, theirs) = result.conflicts().next().unwrap();
        assert_eq!(ours, toks("x b").as_slice());
        assert_eq!(base, toks("a b").as_slice());
        assert_eq!(theirs, toks("a y").as_slice());
    }

    #[test]
    fn test_two_separate_conflicts() {
        let result = diff3_merge(
            &toks("p 1 q r s 2 t"),
            &toks("p 0 q r s 0 t"),
            &toks("p 3 q r s 4 t"),
        );
        assert_eq!(result.conflict_count(), 2);
    }

    #[test]
    fn test_delete_versus_edit_conflicts() {
        let result = diff3_merge(&toks("a c"), &toks("a b c"), &toks("a B c"));
        assert_eq!(result.conflict_count(), 1);
        let (ours, base, theirs) = result.conflicts().next().unwrap();
        assert!(ours.is_empty());
        assert_eq!(base, toks("b").as_slice());
        assert_eq!(theirs, toks("B").as_slice());
    }

    #[test]
    fn test_empty_inputs() {
        assert!(diff3_merge(&[], &[], &[]).regions().is_empty());
        let result = diff3_merge(&toks("x"), &[], &toks("y"));
        assert_eq!(result.conflict_count(), 1);
    }

    #[test]
    fn test_hunk_classification() {
        let hunks = diff3_hunks(&toks("a X c"), &toks("a b c"), &toks("a b c"));
        assert_eq!(
            hunks,
            vec![
                Diff3Hunk::Stable(toks("a")),
                Diff3Hunk::OursChanged(toks("X")),
                Diff3Hunk::Stable(toks("c")),
            ]
        );
    }

    #[test]
    fn test_deletion_slides_down_past_repeated_token() {
        // theirs drops one of two `;`; the deletion is placed on the second
        // one, clear of the line break ours inserted before the first
        let result = diff3_merge(
            &toks("c a ⏎ ; ; b ⏎"),
            &toks("c a ; ; b ⏎"),
            &toks("c b a ; b ⏎"),
        );
        assert_eq!(result.regions(), &[MergeRegion::Stable(toks("c b a ⏎ ; b ⏎"))]);
    }

    #[test]
    fn test_touching_edit_and_delete_conflict() {
        let result = diff3_merge(&toks("b d"), &toks("b )"), &toks(")"));
        assert_eq!(
            result.regions(),
            &[MergeRegion::Conflict {
                ours: toks("b d"),
                base: toks("b )"),
                theirs: toks(")"),
            }]
        );
    }

    #[test]
    fn test_compaction_slides_insert_to_last_position() {
        let script = diff_script(&toks("a b"), &toks("a b b"));
        assert_eq!(
            script,
            vec![Change { base_start: 2, base_len: 0, side_start: 2, side_len: 1 }]
        );
    }

    #[test]
    fn test_script_for_unmatched_tokens() {
        let script = diff_script(&toks("x y z"), &toks("p q"));
        assert_eq!(
            script,
            vec![Change { base_start: 0, base_len: 3, side_start: 0, side_len: 2 }]
        );
    }
}
