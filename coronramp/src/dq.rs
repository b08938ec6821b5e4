//! Data-quality bit flags.
//!
//! Bit positions follow the JWST data-quality convention so that group and
//! pixel DQ arrays produced by the standard steps can be combined directly.

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct DqFlags: u32 {
        const DO_NOT_USE      = 1 << 0;
        const SATURATED       = 1 << 1;
        const JUMP_DET        = 1 << 2;
        const DROPOUT         = 1 << 3;
        const OUTLIER         = 1 << 4;
        const PERSISTENCE     = 1 << 5;
        const AD_FLOOR        = 1 << 6;
        const CHARGELOSS      = 1 << 7;
        const DEAD            = 1 << 10;
        const HOT             = 1 << 11;
        const WARM            = 1 << 12;
        const LOW_QE          = 1 << 13;
        const RC              = 1 << 14;
        const TELEGRAPH       = 1 << 15;
        const NONLINEAR       = 1 << 16;
        const BAD_REF_PIXEL   = 1 << 17;
        const NO_SAT_CHECK    = 1 << 21;
        const OTHER_BAD_PIXEL = 1 << 30;
        const REFERENCE_PIXEL = 1 << 31;
    }
}

impl DqFlags {
    /// True if any bit of `self` is set in the raw DQ word.
    #[inline]
    pub fn is_set_in(self, dq: u32) -> bool {
        dq & self.bits() != 0
    }
}

/// Set `flags` on every DQ word whose mask entry is true.
pub fn or_flags_where(dq: &mut [u32], mask: &[bool], flags: DqFlags) {
    assert_eq!(dq.len(), mask.len(), "DQ and mask length mismatch");
    let bits = flags.bits();
    for (d, &m) in dq.iter_mut().zip(mask) {
        if m {
            *d |= bits;
        }
    }
}
