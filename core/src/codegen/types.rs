use std::fmt;
use std::ops::BitOr;

use crate::error::{EngineError, EngineResult};

/// Most local slots a generated method's parameters may occupy.
pub const MAX_PARAM_SLOTS: u16 = 255;

/// Static value types known to the code generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Long,
    Number,
    Boolean,
    Object,
}

impl Type {
    /// Local slots occupied by a value of this type. Wide primitives take two.
    #[inline]
    pub const fn slots(self) -> u16 {
        match self {
            Type::Long | Type::Number => 2,
            Type::Int | Type::Boolean | Type::Object => 1,
        }
    }

    #[inline]
    pub const fn is_object(self) -> bool {
        matches!(self, Type::Object)
    }

    pub const fn descriptor(self) -> char {
        match self {
            Type::Int => 'I',
            Type::Long => 'J',
            Type::Number => 'D',
            Type::Boolean => 'Z',
            Type::Object => 'L',
        }
    }

    pub(crate) const fn tag(self) -> u8 {
        match self {
            Type::Int => 0,
            Type::Long => 1,
            Type::Number => 2,
            Type::Boolean => 3,
            Type::Object => 4,
        }
    }

    pub(crate) const fn from_tag(tag: u8) -> Option<Type> {
        match tag {
            0 => Some(Type::Int),
            1 => Some(Type::Long),
            2 => Some(Type::Number),
            3 => Some(Type::Boolean),
            4 => Some(Type::Object),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Type::Int => "int",
            Type::Long => "long",
            Type::Number => "double",
            Type::Boolean => "boolean",
            Type::Object => "object",
        };
        f.write_str(name)
    }
}

/// Parameter and return types of a generated method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    pub ret: Type,
    pub params: Vec<Type>,
}

impl MethodSignature {
    pub fn new(ret: Type, params: Vec<Type>) -> Self {
        Self { ret, params }
    }

    /// Total local slots taken by the parameters.
    pub fn param_slots(&self) -> u16 {
        self.params.iter().map(|t| t.slots()).sum()
    }

    /// Slot index of each parameter, in declaration order.
    pub fn param_slot_offsets(&self) -> Vec<u16> {
        let mut slot = 0;
        self.params
            .iter()
            .map(|t| {
                let at = slot;
                slot += t.slots();
                at
            })
            .collect()
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for p in &self.params {
            write!(f, "{}", p.descriptor())?;
        }
        write!(f, "){}", self.ret.descriptor())
    }
}

/// Call-site flag bits. The program point lives in the high bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CallSiteFlags(u32);

impl CallSiteFlags {
    pub const NONE: CallSiteFlags = CallSiteFlags(0);
    /// Access targets a scope object rather than an ordinary receiver.
    pub const SCOPE: CallSiteFlags = CallSiteFlags(1 << 0);
    pub const FAST_SCOPE: CallSiteFlags = CallSiteFlags(1 << 1);
    pub const STRICT: CallSiteFlags = CallSiteFlags(1 << 2);
    /// Operation runs under a speculative type assumption.
    pub const OPTIMISTIC: CallSiteFlags = CallSiteFlags(1 << 3);

    pub const PROGRAM_POINT_SHIFT: u32 = 11;
    pub const MAX_PROGRAM_POINT: i32 = (1 << (32 - Self::PROGRAM_POINT_SHIFT)) - 1;
    const FLAGS_MASK: u32 = (1 << Self::PROGRAM_POINT_SHIFT) - 1;

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn from_bits(bits: u32) -> CallSiteFlags {
        CallSiteFlags(bits)
    }

    #[inline]
    pub const fn contains(self, other: CallSiteFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: CallSiteFlags) {
        self.0 |= other.0;
    }

    #[inline]
    pub const fn is_optimistic(self) -> bool {
        self.contains(CallSiteFlags::OPTIMISTIC)
    }

    #[inline]
    pub const fn is_scope(self) -> bool {
        self.contains(CallSiteFlags::SCOPE)
    }

    #[inline]
    pub const fn is_strict(self) -> bool {
        self.contains(CallSiteFlags::STRICT)
    }

    /// Program point carried by these flags; 0 when unset.
    #[inline]
    pub const fn program_point(self) -> i32 {
        (self.0 >> Self::PROGRAM_POINT_SHIFT) as i32
    }

    pub fn with_program_point(self, pp: i32) -> CallSiteFlags {
        assert!(Self::is_valid_program_point(pp), "program point {pp} out of range");
        CallSiteFlags((self.0 & Self::FLAGS_MASK) | ((pp as u32) << Self::PROGRAM_POINT_SHIFT))
    }

    /// Like [`with_program_point`](Self::with_program_point), but reports an out-of-range point.
    pub fn try_with_program_point(self, pp: i32) -> EngineResult<CallSiteFlags> {
        if !Self::is_valid_program_point(pp) {
            return Err(EngineError::internal(format!(
                "program point {pp} outside 0..={}",
                Self::MAX_PROGRAM_POINT
            )));
        }
        Ok(self.with_program_point(pp))
    }

    #[inline]
    pub const fn is_valid_program_point(pp: i32) -> bool {
        pp >= 0 && pp <= Self::MAX_PROGRAM_POINT
    }
}

impl BitOr for CallSiteFlags {
    type Output = CallSiteFlags;

    fn bitor(self, rhs: CallSiteFlags) -> CallSiteFlags {
        CallSiteFlags(self.0 | rhs.0)
    }
}

impl fmt::Display for CallSiteFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.is_scope() {
            parts.push("scope".to_string());
        }
        if self.contains(CallSiteFlags::FAST_SCOPE) {
            parts.push("fastscope".to_string());
        }
        if self.is_strict() {
            parts.push("strict".to_string());
        }
        if self.is_optimistic() {
            parts.push("optimistic".to_string());
        }
        if self.program_point() != 0 {
            parts.push(format!("pp={}", self.program_point()));
        }
        f.write_str(&parts.join("|"))
    }
}
