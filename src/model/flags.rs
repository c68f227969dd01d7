/// A single flag from the closed enumeration the monitor understands
/// (`SPEC_FULL.md` §3). Adapters may track provider-specific flags too, but
/// only these participate in the monitor's own logic (blacklisting DRAFT,
/// deriving `is_unread`/`is_flagged`). `Serialize`/`Deserialize` mirror the
/// teacher's `storage/db.rs` pattern of persisting a message's flags as a
/// JSON array in a `TEXT` column rather than a raw bitmask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum EmailFlag {
    Unread,
    Flagged,
    Draft,
}

const ALL_FLAGS: [EmailFlag; 3] = [EmailFlag::Unread, EmailFlag::Flagged, EmailFlag::Draft];

fn bit(flag: EmailFlag) -> u8 {
    match flag {
        EmailFlag::Unread => 1 << 0,
        EmailFlag::Flagged => 1 << 1,
        EmailFlag::Draft => 1 << 2,
    }
}

/// A set over [`EmailFlag`], stored as a small bitset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct EmailFlags(u8);

impl EmailFlags {
    pub fn empty() -> Self {
        Self(0)
    }

    /// Raw bit representation, for adapters that need to serialize a flag
    /// set (e.g. into a storage row).
    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn intersects(&self, other: &EmailFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn from_flags(flags: impl IntoIterator<Item = EmailFlag>) -> Self {
        let mut set = Self::empty();
        for f in flags {
            set.add(f);
        }
        set
    }

    pub fn contains(&self, flag: EmailFlag) -> bool {
        self.0 & bit(flag) != 0
    }

    pub fn add(&mut self, flag: EmailFlag) {
        self.0 |= bit(flag);
    }

    pub fn remove(&mut self, flag: EmailFlag) {
        self.0 &= !bit(flag);
    }

    pub fn equals(&self, other: &EmailFlags) -> bool {
        self == other
    }

    pub fn iter(&self) -> impl Iterator<Item = EmailFlag> + '_ {
        ALL_FLAGS.into_iter().filter(move |f| self.contains(*f))
    }

    /// The set as a `Vec<EmailFlag>`, for JSON-array serialization the way
    /// the teacher's storage layer persists a message's flags.
    pub fn to_vec(&self) -> Vec<EmailFlag> {
        self.iter().collect()
    }
}

impl FromIterator<EmailFlag> for EmailFlags {
    fn from_iter<I: IntoIterator<Item = EmailFlag>>(iter: I) -> Self {
        Self::from_flags(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_remove_contains_roundtrip() {
        let mut flags = EmailFlags::empty();
        assert!(!flags.contains(EmailFlag::Unread));
        flags.add(EmailFlag::Unread);
        assert!(flags.contains(EmailFlag::Unread));
        flags.remove(EmailFlag::Unread);
        assert!(!flags.contains(EmailFlag::Unread));
    }

    #[test]
    fn equals_ignores_order_of_construction() {
        let a = EmailFlags::from_flags([EmailFlag::Unread, EmailFlag::Flagged]);
        let b = EmailFlags::from_flags([EmailFlag::Flagged, EmailFlag::Unread]);
        assert!(a.equals(&b));
    }

    #[test]
    fn bits_roundtrip() {
        let flags = EmailFlags::from_flags([EmailFlag::Unread, EmailFlag::Draft]);
        let restored = EmailFlags::from_bits(flags.bits());
        assert!(restored.equals(&flags));
    }

    #[test]
    fn intersects_detects_shared_flags() {
        let a = EmailFlags::from_flags([EmailFlag::Draft]);
        let b = EmailFlags::from_flags([EmailFlag::Draft, EmailFlag::Unread]);
        let c = EmailFlags::from_flags([EmailFlag::Flagged]);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }
}
