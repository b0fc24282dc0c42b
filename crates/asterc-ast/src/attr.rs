//! Function attribute flags shared between AST function types and IR
//! functions.

use bitflags::bitflags;

bitflags! {
    /// Attributes a function declaration may carry.
    ///
    /// These are parsed by the front end onto the function type and
    /// propagated onto the IR function when it is created.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct FuncAttrs: u32 {
        /// The linkage name is used verbatim; the mangler skips this function.
        const NOMANGLE = 1 << 0;
        /// Every call to this function must be inlined.
        const FORCE_INLINE = 1 << 1;
        /// The function never returns to its caller.
        const NORETURN = 1 << 2;
        /// The function has no observable side effects.
        const PURE = 1 << 3;
        /// The function calls no other functions.
        const LEAF = 1 << 4;
        /// The function may be evaluated at compile time.
        const CONST_EVAL = 1 << 5;
        /// The result of a call may be discarded without warning.
        const DISCARDABLE = 1 << 6;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_independent() {
        let attrs = FuncAttrs::NOMANGLE | FuncAttrs::LEAF;
        assert!(attrs.contains(FuncAttrs::NOMANGLE));
        assert!(attrs.contains(FuncAttrs::LEAF));
        assert!(!attrs.contains(FuncAttrs::FORCE_INLINE));
    }
}
