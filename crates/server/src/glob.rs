// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Glob overlap engine.
//!
//! Decides whether two `/`-separated glob patterns can match a common path.
//! Patterns are split into segments; overlap holds iff the segment counts
//! match and every segment pair overlaps. Per-segment overlap is decided by
//! BFS reachability on the product automaton of the two token sequences, with
//! character classes kept as normalised rune ranges. No path enumeration.

use crate::error::{Error, Result};

/// Hard cap on tokens per pattern.
pub const MAX_TOKENS: usize = 50;

/// Hard cap on wildcard tokens (`*` and `?`) per pattern.
pub const MAX_WILDCARDS: usize = 10;

const MAX_RUNE: u32 = 0x0010_FFFF;
const SEPARATOR: u32 = '/' as u32;

// -- Tokens --------------------------------------------------------------------

/// A sorted, coalesced set of inclusive rune ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RangeSet {
    ranges: Vec<(u32, u32)>,
}

impl RangeSet {
    fn single(c: char) -> Self {
        Self { ranges: vec![(c as u32, c as u32)] }
    }

    fn from_ranges(mut ranges: Vec<(u32, u32)>) -> Self {
        ranges.retain(|(lo, hi)| lo <= hi);
        ranges.sort_unstable();
        let mut coalesced: Vec<(u32, u32)> = Vec::with_capacity(ranges.len());
        for (lo, hi) in ranges {
            match coalesced.last_mut() {
                Some((_, prev_hi)) if lo <= prev_hi.saturating_add(1) => {
                    *prev_hi = (*prev_hi).max(hi);
                }
                _ => coalesced.push((lo, hi)),
            }
        }
        // Segments never contain the separator, so exclude it up front.
        let mut out = Vec::with_capacity(coalesced.len() + 1);
        for (lo, hi) in coalesced {
            if lo <= SEPARATOR && SEPARATOR <= hi {
                if lo < SEPARATOR {
                    out.push((lo, SEPARATOR - 1));
                }
                if SEPARATOR < hi {
                    out.push((SEPARATOR + 1, hi));
                }
            } else {
                out.push((lo, hi));
            }
        }
        Self { ranges: out }
    }

    /// A class can normalise to nothing, e.g. `[/]`.
    fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Complement within the non-separator rune universe.
    fn negate(&self) -> Self {
        let mut out = Vec::new();
        let mut next = 0u32;
        for &(lo, hi) in &self.ranges {
            if next < lo {
                out.push((next, lo - 1));
            }
            next = hi.saturating_add(1);
        }
        if next <= MAX_RUNE {
            out.push((next, MAX_RUNE));
        }
        Self::from_ranges(out)
    }

    /// Whether any rune is in both sets.
    fn intersects(&self, other: &Self) -> bool {
        let (mut i, mut j) = (0, 0);
        while i < self.ranges.len() && j < other.ranges.len() {
            let (a_lo, a_hi) = self.ranges[i];
            let (b_lo, b_hi) = other.ranges[j];
            if a_lo.max(b_lo) <= a_hi.min(b_hi) {
                return true;
            }
            if a_hi < b_hi {
                i += 1;
            } else {
                j += 1;
            }
        }
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// `*` — zero or more non-separator runes.
    Star,
    /// `?` — exactly one non-separator rune. Kept distinct from a class so
    /// the complexity guard counts lexical wildcards, not range shapes.
    Question,
    /// One rune drawn from the set: a literal or a character class.
    One(RangeSet),
}

// -- Parsing -------------------------------------------------------------------

/// One parsed `/`-separated segment.
#[derive(Debug, Clone)]
struct Segment {
    tokens: Vec<Token>,
}

fn parse_segment(seg: &str, pattern: &str) -> Result<Segment> {
    let mut tokens = Vec::new();
    let mut chars = seg.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' => {
                // Adjacent stars collapse to one.
                if tokens.last() != Some(&Token::Star) {
                    tokens.push(Token::Star);
                }
            }
            '?' => tokens.push(Token::Question),
            '\\' => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| Error::InvalidPattern(format!("trailing escape in {pattern:?}")))?;
                tokens.push(Token::One(RangeSet::single(escaped)));
            }
            '[' => tokens.push(Token::One(parse_class(&mut chars, pattern)?)),
            ']' => {
                return Err(Error::InvalidPattern(format!("unmatched ']' in {pattern:?}")));
            }
            other => tokens.push(Token::One(RangeSet::single(other))),
        }
    }

    Ok(Segment { tokens })
}

/// Parse the body of a `[...]` class; the leading `[` is already consumed.
fn parse_class(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    pattern: &str,
) -> Result<RangeSet> {
    let negated = chars.peek() == Some(&'^');
    if negated {
        chars.next();
    }

    let mut ranges: Vec<(u32, u32)> = Vec::new();
    let mut closed = false;
    let mut first = true;

    while let Some(c) = chars.next() {
        let lo = match c {
            ']' if !first => {
                closed = true;
                break;
            }
            '\\' => chars
                .next()
                .ok_or_else(|| Error::InvalidPattern(format!("trailing escape in {pattern:?}")))?,
            other => other,
        };
        first = false;

        // A `-` between two chars forms a range; elsewhere it is literal.
        if chars.peek() == Some(&'-') {
            let mut ahead = chars.clone();
            ahead.next();
            if ahead.peek().is_some() && ahead.peek() != Some(&']') {
                chars.next();
                let hi = match chars.next() {
                    Some('\\') => chars.next().ok_or_else(|| {
                        Error::InvalidPattern(format!("trailing escape in {pattern:?}"))
                    })?,
                    Some(h) => h,
                    None => {
                        return Err(Error::InvalidPattern(format!(
                            "unterminated class in {pattern:?}"
                        )));
                    }
                };
                if (hi as u32) < (lo as u32) {
                    return Err(Error::InvalidPattern(format!(
                        "inverted range {lo}-{hi} in {pattern:?}"
                    )));
                }
                ranges.push((lo as u32, hi as u32));
                continue;
            }
        }
        ranges.push((lo as u32, lo as u32));
    }

    if !closed {
        return Err(Error::InvalidPattern(format!("unterminated class in {pattern:?}")));
    }

    let set = RangeSet::from_ranges(ranges);
    Ok(if negated { set.negate() } else { set })
}

fn parse(pattern: &str) -> Result<Vec<Segment>> {
    pattern.split('/').map(|seg| parse_segment(seg, pattern)).collect()
}

// -- Complexity guard ----------------------------------------------------------

/// Reject patterns whose automaton could blow up: more than [`MAX_TOKENS`]
/// tokens or more than [`MAX_WILDCARDS`] wildcard tokens.
pub fn validate_complexity(pattern: &str) -> Result<()> {
    let segments = parse(pattern)?;
    let mut tokens = 0usize;
    let mut wildcards = 0usize;
    for seg in &segments {
        tokens += seg.tokens.len();
        for t in &seg.tokens {
            match t {
                Token::Star | Token::Question => wildcards += 1,
                Token::One(_) => {}
            }
        }
    }
    if tokens > MAX_TOKENS {
        return Err(Error::PatternTooComplex(format!(
            "{pattern:?} has {tokens} tokens (max {MAX_TOKENS})"
        )));
    }
    if wildcards > MAX_WILDCARDS {
        return Err(Error::PatternTooComplex(format!(
            "{pattern:?} has {wildcards} wildcards (max {MAX_WILDCARDS})"
        )));
    }
    Ok(())
}

// -- Overlap -------------------------------------------------------------------

/// Whether some path exists that both patterns match.
///
/// Segment counts must agree; `a/*` and `a/b/c` never overlap because `*`
/// does not cross separators.
pub fn overlap(a: &str, b: &str) -> Result<bool> {
    let sa = parse(a)?;
    let sb = parse(b)?;
    if sa.len() != sb.len() {
        return Ok(false);
    }
    Ok(sa.iter().zip(sb.iter()).all(|(x, y)| segments_overlap(x, y)))
}

/// BFS over `(i, j)` token positions. `*` takes an epsilon skip and may pair
/// with any consuming step on the other side; two single-rune tokens step
/// together iff their range sets intersect. Accept at `(len_a, len_b)`.
fn segments_overlap(a: &Segment, b: &Segment) -> bool {
    let (la, lb) = (a.tokens.len(), b.tokens.len());
    let mut visited = vec![false; (la + 1) * (lb + 1)];
    let idx = |i: usize, j: usize| i * (lb + 1) + j;

    let mut queue = std::collections::VecDeque::new();
    visited[idx(0, 0)] = true;
    queue.push_back((0usize, 0usize));

    while let Some((i, j)) = queue.pop_front() {
        if i == la && j == lb {
            return true;
        }

        let ta = a.tokens.get(i);
        let tb = b.tokens.get(j);

        let mut push = |i: usize, j: usize, visited: &mut Vec<bool>| {
            if !visited[idx(i, j)] {
                visited[idx(i, j)] = true;
                queue.push_back((i, j));
            }
        };

        // Star matches empty: epsilon past it.
        if ta == Some(&Token::Star) {
            push(i + 1, j, &mut visited);
        }
        if tb == Some(&Token::Star) {
            push(i, j + 1, &mut visited);
        }

        // Concurrent consumption of one rune on each side.
        match (ta, tb) {
            (Some(Token::Star), Some(other)) if *other != Token::Star => {
                // Star absorbs whatever the other side consumes.
                push(i, j + 1, &mut visited);
            }
            (Some(other), Some(Token::Star)) if *other != Token::Star => {
                push(i + 1, j, &mut visited);
            }
            (Some(x), Some(y)) if one_rune_intersect(x, y) => {
                push(i + 1, j + 1, &mut visited);
            }
            // Star/Star needs no extra move: either epsilon reaches the goal.
            _ => {}
        }
    }

    false
}

/// Whether two single-rune tokens can consume a common rune.
fn one_rune_intersect(a: &Token, b: &Token) -> bool {
    match (a, b) {
        (Token::Question, Token::Question) => true,
        (Token::Question, Token::One(set)) | (Token::One(set), Token::Question) => {
            !set.is_empty()
        }
        (Token::One(x), Token::One(y)) => x.intersects(y),
        _ => false,
    }
}

#[cfg(test)]
#[path = "glob_tests.rs"]
mod tests;
