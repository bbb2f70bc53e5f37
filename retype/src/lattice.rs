// lattice.rs — Conversion map, role constraints, and constant value policy
//
// Declares which source→target element-type rewrites a pass invocation
// applies, which element types an input/output role may carry, and how
// constant payloads are converted when their element type changes.
//
// Preconditions: none.
// Postconditions: lookups are total; value conversion never wraps (integer
//   narrowing clamps, float→integer saturates).
// Failure modes: malformed rule text (`FROM:TO`) when parsing.
// Side effects: `ConversionMap::new` logs suspicious rule sets via `tracing`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{can_widen, ElementType, Family, UnknownElementType};

// ── Conversion rules ────────────────────────────────────────────────────────

/// One `from → to` rewrite rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Conversion {
    pub from: ElementType,
    pub to: ElementType,
}

impl Conversion {
    pub fn new(from: ElementType, to: ElementType) -> Self {
        Self { from, to }
    }
}

impl fmt::Display for Conversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.from, self.to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionParseError {
    #[error("conversion '{0}' must have the form FROM:TO (e.g. i64:i32)")]
    Malformed(String),
    #[error(transparent)]
    UnknownType(#[from] UnknownElementType),
}

impl FromStr for Conversion {
    type Err = ConversionParseError;

    /// Accepts `i64:i32`, `i64=i32` and `i64->i32`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (from, to) = s
            .split_once("->")
            .or_else(|| s.split_once(':'))
            .or_else(|| s.split_once('='))
            .ok_or_else(|| ConversionParseError::Malformed(s.to_string()))?;
        Ok(Conversion {
            from: from.parse()?,
            to: to.parse()?,
        })
    }
}

/// Ordered list of conversion rules, applied atomically by one pass run.
///
/// The first rule whose source matches wins. A value is rewritten at most
/// once per invocation; targets are never re-matched against later rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionMap {
    rules: Vec<Conversion>,
}

impl ConversionMap {
    /// Build a map, dropping identity rules.
    pub fn new(rules: impl IntoIterator<Item = Conversion>) -> Self {
        let mut kept: Vec<Conversion> = Vec::new();
        for rule in rules {
            if rule.from == rule.to {
                continue;
            }
            if let Some(first) = kept.iter().find(|r| r.from == rule.from) {
                warn!(
                    shadowed = %rule,
                    winner = %first,
                    "conversion rule shadowed by an earlier rule with the same source"
                );
                continue;
            }
            kept.push(rule);
        }
        for rule in &kept {
            if kept.iter().any(|r| r.from == rule.to) {
                warn!(
                    rule = %rule,
                    "conversion target is also a source; re-running the pass will not be a no-op"
                );
            }
        }
        Self { rules: kept }
    }

    pub fn from_pairs(pairs: &[(ElementType, ElementType)]) -> Self {
        Self::new(pairs.iter().map(|&(from, to)| Conversion::new(from, to)))
    }

    pub fn rules(&self) -> &[Conversion] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Replacement type for `t`, or `None` when no rule matches.
    pub fn lookup(&self, t: ElementType) -> Option<ElementType> {
        self.rules.iter().find(|r| r.from == t).map(|r| r.to)
    }

    pub fn is_source(&self, t: ElementType) -> bool {
        self.rules.iter().any(|r| r.from == t)
    }
}

impl fmt::Display for ConversionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rules: Vec<String> = self.rules.iter().map(|r| r.to_string()).collect();
        write!(f, "[{}]", rules.join(", "))
    }
}

// ── Role constraints ────────────────────────────────────────────────────────

/// Element types accepted by one input or output role of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeConstraint {
    Any,
    Integer,
    Float,
    /// Index-typed results: i32 or i64 only.
    Index,
    Exact(ElementType),
    /// Must equal the type of the node's input at this position.
    SameAs(usize),
}

/// Outcome of resolving a value's type against the conversion map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// No rule matches; keep the current type.
    Unchanged,
    /// The mapped type satisfies the role.
    Mapped(ElementType),
    /// The mapped type violates the role; the nearest acceptable type is used.
    Fallback(ElementType),
    /// A rule matches but neither the mapped type nor any alternative is
    /// acceptable. The value keeps its current type.
    Rejected { wanted: ElementType },
}

impl Resolution {
    /// Type the value should carry after resolution, if it changes.
    pub fn new_type(self) -> Option<ElementType> {
        match self {
            Resolution::Mapped(t) | Resolution::Fallback(t) => Some(t),
            Resolution::Unchanged | Resolution::Rejected { .. } => None,
        }
    }
}

impl TypeConstraint {
    /// Check `t` against the role. `peers` are the node's current input types.
    pub fn accepts(self, t: ElementType, peers: &[ElementType]) -> bool {
        match self {
            TypeConstraint::Any => true,
            TypeConstraint::Integer => t.is_integer(),
            TypeConstraint::Float => t.is_float(),
            TypeConstraint::Index => matches!(t, ElementType::I32 | ElementType::I64),
            TypeConstraint::Exact(want) => t == want,
            TypeConstraint::SameAs(i) => peers.get(i).map_or(true, |&p| p == t),
        }
    }

    /// Resolve the replacement for a value currently typed `current`.
    pub fn resolve(self, map: &ConversionMap, current: ElementType) -> Resolution {
        let Some(wanted) = map.lookup(current) else {
            return Resolution::Unchanged;
        };
        if self.accepts(wanted, &[]) {
            return Resolution::Mapped(wanted);
        }
        match self.nearest_accepted(wanted, map) {
            Some(t) if t != current => Resolution::Fallback(t),
            _ => Resolution::Rejected { wanted },
        }
    }

    /// Closest type this role accepts that no rule rewrites away.
    ///
    /// Prefers `near`'s own family, then the family of the role; among
    /// candidates the smallest bit-width distance wins, wider on ties.
    pub fn nearest_accepted(self, near: ElementType, map: &ConversionMap) -> Option<ElementType> {
        if let TypeConstraint::Exact(t) = self {
            return Some(t);
        }
        let candidates: Vec<ElementType> = ElementType::ALL
            .into_iter()
            .filter(|&t| self.accepts(t, &[]) && !map.is_source(t))
            .collect();
        let same_family: Vec<ElementType> = candidates
            .iter()
            .copied()
            .filter(|t| t.family() == near.family())
            .collect();
        let pool = if same_family.is_empty() {
            candidates
        } else {
            same_family
        };
        pool.into_iter().min_by_key(|&t| {
            let distance = t.bit_width().abs_diff(near.bit_width());
            // Widening within a chain beats narrowing at equal distance.
            let narrower = !can_widen(near, t) && t.bit_width() < near.bit_width();
            (distance, narrower, t)
        })
    }
}

// ── Constant values ─────────────────────────────────────────────────────────

/// Constant payload, stored in the widest representation of its family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstantValues {
    Integer(Vec<i128>),
    Float(Vec<f64>),
    Boolean(Vec<bool>),
}

impl ConstantValues {
    pub fn len(&self) -> usize {
        match self {
            ConstantValues::Integer(v) => v.len(),
            ConstantValues::Float(v) => v.len(),
            ConstantValues::Boolean(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values as i128, converting floats and booleans with `convert_values` rules.
    pub fn as_integers(&self) -> Vec<i128> {
        match self {
            ConstantValues::Integer(v) => v.clone(),
            ConstantValues::Float(v) => v.iter().map(|&x| saturate_float(x)).collect(),
            ConstantValues::Boolean(v) => v.iter().map(|&b| b as i128).collect(),
        }
    }

    pub fn as_floats(&self) -> Vec<f64> {
        match self {
            ConstantValues::Integer(v) => v.iter().map(|&x| x as f64).collect(),
            ConstantValues::Float(v) => v.clone(),
            ConstantValues::Boolean(v) => v.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect(),
        }
    }

    /// Move integer values equal to `from`'s extremes onto `to`'s extremes.
    ///
    /// Slice bounds use the type maximum (and minimum) to mean "unbounded".
    pub fn promote_sentinels(&mut self, from: ElementType, to: ElementType) -> usize {
        let (Some((from_min, from_max)), Some((to_min, to_max))) =
            (from.integer_range(), to.integer_range())
        else {
            return 0;
        };
        let ConstantValues::Integer(values) = self else {
            return 0;
        };
        let mut promoted = 0;
        for v in values.iter_mut() {
            let target = if *v == from_max {
                to_max
            } else if *v == from_min && from_min != 0 {
                to_min
            } else {
                continue;
            };
            if *v != target {
                *v = target;
                promoted += 1;
            }
        }
        promoted
    }
}

/// Clamp an integer into `to`'s representable range.
pub fn clamp_integer(value: i128, to: ElementType) -> i128 {
    match to.integer_range() {
        Some((min, max)) => value.clamp(min, max),
        None => value,
    }
}

fn saturate_float(x: f64) -> i128 {
    // `as` saturates at the i128 bounds and maps NaN to 0.
    x.trunc() as i128
}

/// Round a float to the precision of `to`.
///
/// f16 and bf16 payloads are kept at f32 granularity; values are only
/// type-tagged, never range-checked, for float narrowing.
fn round_float(x: f64, to: ElementType) -> f64 {
    match to {
        ElementType::F64 => x,
        _ => x as f32 as f64,
    }
}

/// Convert a constant payload from `from` to `to`.
///
/// Integer narrowing clamps rather than wraps, so a sentinel at
/// `i64::MAX` becomes `i32::MAX`. Float→integer saturates.
pub fn convert_values(values: &ConstantValues, from: ElementType, to: ElementType) -> ConstantValues {
    if from == to {
        return values.clone();
    }
    match to.family() {
        Family::Signed | Family::Unsigned => ConstantValues::Integer(
            values
                .as_integers()
                .into_iter()
                .map(|v| clamp_integer(v, to))
                .collect(),
        ),
        Family::Float => ConstantValues::Float(
            values
                .as_floats()
                .into_iter()
                .map(|x| round_float(x, to))
                .collect(),
        ),
        Family::Boolean => ConstantValues::Boolean(match values {
            ConstantValues::Boolean(v) => v.clone(),
            ConstantValues::Integer(v) => v.iter().map(|&x| x != 0).collect(),
            ConstantValues::Float(v) => v.iter().map(|&x| x != 0.0).collect(),
        }),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
