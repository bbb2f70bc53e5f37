// types.rs — Tensor element types
//
// The scalar representations a tensor value can carry. Element types are
// compared by identity and ordered by bit width within a family; integer
// types expose their representable range for value-aware narrowing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Scalar numeric representation of a tensor value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Boolean,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F16,
    Bf16,
    F32,
    F64,
}

/// Coarse classification used when choosing replacement types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Boolean,
    Signed,
    Unsigned,
    Float,
}

impl ElementType {
    /// Every element type, in declaration order.
    pub const ALL: [ElementType; 13] = [
        ElementType::Boolean,
        ElementType::I8,
        ElementType::I16,
        ElementType::I32,
        ElementType::I64,
        ElementType::U8,
        ElementType::U16,
        ElementType::U32,
        ElementType::U64,
        ElementType::F16,
        ElementType::Bf16,
        ElementType::F32,
        ElementType::F64,
    ];

    pub fn bit_width(self) -> u32 {
        match self {
            ElementType::Boolean => 8,
            ElementType::I8 | ElementType::U8 => 8,
            ElementType::I16 | ElementType::U16 | ElementType::F16 | ElementType::Bf16 => 16,
            ElementType::I32 | ElementType::U32 | ElementType::F32 => 32,
            ElementType::I64 | ElementType::U64 | ElementType::F64 => 64,
        }
    }

    pub fn family(self) -> Family {
        match self {
            ElementType::Boolean => Family::Boolean,
            ElementType::I8 | ElementType::I16 | ElementType::I32 | ElementType::I64 => {
                Family::Signed
            }
            ElementType::U8 | ElementType::U16 | ElementType::U32 | ElementType::U64 => {
                Family::Unsigned
            }
            ElementType::F16 | ElementType::Bf16 | ElementType::F32 | ElementType::F64 => {
                Family::Float
            }
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self.family(), Family::Signed | Family::Unsigned)
    }

    pub fn is_float(self) -> bool {
        self.family() == Family::Float
    }

    /// Inclusive representable range for integer types.
    pub fn integer_range(self) -> Option<(i128, i128)> {
        let range = match self {
            ElementType::I8 => (i8::MIN as i128, i8::MAX as i128),
            ElementType::I16 => (i16::MIN as i128, i16::MAX as i128),
            ElementType::I32 => (i32::MIN as i128, i32::MAX as i128),
            ElementType::I64 => (i64::MIN as i128, i64::MAX as i128),
            ElementType::U8 => (0, u8::MAX as i128),
            ElementType::U16 => (0, u16::MAX as i128),
            ElementType::U32 => (0, u32::MAX as i128),
            ElementType::U64 => (0, u64::MAX as i128),
            _ => return None,
        };
        Some(range)
    }

    /// Lowercase name, matching the serialized form.
    pub fn name(self) -> &'static str {
        match self {
            ElementType::Boolean => "boolean",
            ElementType::I8 => "i8",
            ElementType::I16 => "i16",
            ElementType::I32 => "i32",
            ElementType::I64 => "i64",
            ElementType::U8 => "u8",
            ElementType::U16 => "u16",
            ElementType::U32 => "u32",
            ElementType::U64 => "u64",
            ElementType::F16 => "f16",
            ElementType::Bf16 => "bf16",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
        }
    }
}

// ── Widening chains ─────────────────────────────────────────────────────────

/// Position of a type inside its family's widening chain.
/// Signed: i8 → i16 → i32 → i64
/// Unsigned: u8 → u16 → u32 → u64
/// Float: f16/bf16 → f32 → f64 (f16 and bf16 share a rank)
fn widening_rank(t: ElementType) -> Option<(Family, u8)> {
    match t {
        ElementType::I8 | ElementType::U8 => Some((t.family(), 0)),
        ElementType::I16 | ElementType::U16 | ElementType::F16 | ElementType::Bf16 => {
            Some((t.family(), 1))
        }
        ElementType::I32 | ElementType::U32 | ElementType::F32 => Some((t.family(), 2)),
        ElementType::I64 | ElementType::U64 | ElementType::F64 => Some((t.family(), 3)),
        ElementType::Boolean => None,
    }
}

/// Check if `from` can be widened to `to` without leaving its family.
pub fn can_widen(from: ElementType, to: ElementType) -> bool {
    if from == to {
        return true;
    }
    match (widening_rank(from), widening_rank(to)) {
        (Some((fam_from, rank_from)), Some((fam_to, rank_to))) => {
            fam_from == fam_to && rank_from < rank_to
        }
        _ => false,
    }
}

// ── Parsing and display ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown element type '{0}' (expected one of: boolean, i8, i16, i32, i64, u8, u16, u32, u64, f16, bf16, f32, f64)")]
pub struct UnknownElementType(pub String);

impl FromStr for ElementType {
    type Err = UnknownElementType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let t = match lowered.as_str() {
            "boolean" | "bool" => ElementType::Boolean,
            "i8" => ElementType::I8,
            "i16" => ElementType::I16,
            "i32" => ElementType::I32,
            "i64" => ElementType::I64,
            "u8" => ElementType::U8,
            "u16" => ElementType::U16,
            "u32" => ElementType::U32,
            "u64" => ElementType::U64,
            "f16" => ElementType::F16,
            "bf16" => ElementType::Bf16,
            "f32" => ElementType::F32,
            "f64" => ElementType::F64,
            _ => return Err(UnknownElementType(s.to_string())),
        };
        Ok(t)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
