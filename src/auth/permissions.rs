bitflags::bitflags! {
    /// Permission bitmask carried by a role.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Permissions: u32 {
        const FOLLOW = 0x01;
        const COMMENT = 0x02;
        const WRITE = 0x04;
        const MODERATE = 0x08;
        const ADMIN = 0x80;

        /// What an ordinary member may do. Delegated identities get this set.
        const MEMBER = Self::FOLLOW.bits() | Self::COMMENT.bits() | Self::WRITE.bits();
    }
}
