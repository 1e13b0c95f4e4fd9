use bitflags::bitflags;

bitflags! {
    /// Side effects recorded on a fiber during render and consumed by commit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FiberFlags: u32 {
        const PLACEMENT = 1 << 0;
        const UPDATE = 1 << 1;
        const CHILD_DELETION = 1 << 2;
        const PASSIVE_EFFECT = 1 << 3;
        const REF = 1 << 4;
        const VISIBILITY = 1 << 5;
        const SHOULD_CAPTURE = 1 << 6;
        const DID_CAPTURE = 1 << 7;
    }
}

impl FiberFlags {
    pub const MUTATION_MASK: FiberFlags = FiberFlags::PLACEMENT
        .union(FiberFlags::UPDATE)
        .union(FiberFlags::CHILD_DELETION)
        .union(FiberFlags::REF)
        .union(FiberFlags::VISIBILITY);

    pub const LAYOUT_MASK: FiberFlags = FiberFlags::REF;

    /// Deletions count as passive work because unmounted effects must be torn down.
    pub const PASSIVE_MASK: FiberFlags = FiberFlags::PASSIVE_EFFECT.union(FiberFlags::CHILD_DELETION);
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HookEffectTags: u8 {
        const HAS_EFFECT = 1 << 0;
        const PASSIVE = 1 << 1;
    }
}
