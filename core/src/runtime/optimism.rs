use std::fmt;

use super::Val;

/// A speculative operation produced a value outside its assumed type.
///
/// Carries the actual value so the caller can continue with it after
/// deoptimizing the site identified by `program_point`.
#[derive(Debug, Clone, PartialEq)]
pub struct UnwarrantedOptimism {
    value: Val,
    program_point: i32,
}

impl UnwarrantedOptimism {
    pub fn new(value: Val, program_point: i32) -> Self {
        Self { value, program_point }
    }

    #[inline]
    pub fn value(&self) -> &Val {
        &self.value
    }

    #[inline]
    pub fn program_point(&self) -> i32 {
        self.program_point
    }

    /// Same condition, attributed to `program_point`.
    pub fn replace_program_point(self, program_point: i32) -> Self {
        Self {
            value: self.value,
            program_point,
        }
    }
}

impl fmt::Display for UnwarrantedOptimism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unwarranted optimism at program point {}: got {} ({})",
            self.program_point,
            self.value,
            self.value.type_name()
        )
    }
}
