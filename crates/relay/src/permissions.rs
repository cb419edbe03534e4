use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PermissionFlags: u32 {
        const UNVERIFIED = 1 << 0;
        const USER = 1 << 1;
        const MODERATOR = 1 << 2;
        const ADMINISTRATOR = 1 << 3;
        const SERVER = 1 << 4;
    }
}

impl PermissionFlags {
    /// Flags of a player that finished admission.
    pub fn verified(self) -> Self {
        (self - Self::UNVERIFIED) | Self::USER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verified_drops_unverified() {
        let flags = PermissionFlags::UNVERIFIED.verified();
        assert_eq!(flags, PermissionFlags::USER);

        let moderator = (PermissionFlags::UNVERIFIED | PermissionFlags::MODERATOR).verified();
        assert!(moderator.contains(PermissionFlags::USER | PermissionFlags::MODERATOR));
        assert!(!moderator.contains(PermissionFlags::UNVERIFIED));
    }

    #[test]
    fn test_bits_round_trip() {
        let flags = PermissionFlags::USER | PermissionFlags::ADMINISTRATOR;
        assert_eq!(PermissionFlags::from_bits_truncate(flags.bits()), flags);
    }
}
