//! Analyses & Transforms (spec.md section 2 component 5 / SPEC_FULL.md
//! 4.5): the Forest analysis, the minimal alias analysis it consults, and
//! the DCE / SimplifyCFG transform passes.

pub mod alias;
pub mod dce;
pub mod forest;
pub mod simplify_cfg;

pub use forest::Forest;

bitflags::bitflags! {
    /// Which analyses a transform pass may have invalidated (spec.md 4.5:
    /// "Invalidation: returns a bit mask of which analyses the pass may
    /// have broken"). `CONTROL_FLOW` is set whenever any CFG edge
    /// changes; `USE_DEF` is set whenever the use-def graph changes in a
    /// way that is not already implied by a `CONTROL_FLOW` change (e.g.
    /// trivial-phi peeling, which redirects uses without touching any
    /// edge).
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct Invalidation: u8 {
        const CONTROL_FLOW = 1 << 0;
        const USE_DEF       = 1 << 1;
    }
}
