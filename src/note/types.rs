use core::fmt::Display;

/// `NT_GNU_ABI_TAG`: ABI information (OS and earliest kernel version).
pub const NT_GNU_ABI_TAG: u32 = 1;
/// `NT_GNU_HWCAP`: synthetic hwcap information.
pub const NT_GNU_HWCAP: u32 = 2;
/// `NT_GNU_BUILD_ID`: unique build identifier.
pub const NT_GNU_BUILD_ID: u32 = 3;
/// `NT_GNU_GOLD_VERSION`: version of the gold linker that produced the file.
pub const NT_GNU_GOLD_VERSION: u32 = 4;
/// `NT_GNU_PROPERTY_TYPE_0`: program property list.
pub const NT_GNU_PROPERTY_TYPE_0: u32 = 5;

/// The kind of a note.
///
/// Note type numbers are not a closed space: every producer may define its
/// own. The well-known GNU kinds get a variant; anything else is carried
/// through [`NoteType::Unknown`] untouched.
///
/// # Examples
/// ```rust
/// use elf_notes::NoteType;
///
/// assert_eq!(NoteType::from(3), NoteType::BuildId);
/// assert_eq!(u32::from(NoteType::Unknown(0x4000)), 0x4000);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NoteType {
    AbiTag,
    Hwcap,
    BuildId,
    GoldVersion,
    Property,
    /// Any other type number. Never holds one of the values above when
    /// built through `From<u32>`.
    Unknown(u32),
}

impl From<u32> for NoteType {
    fn from(value: u32) -> Self {
        match value {
            NT_GNU_ABI_TAG => NoteType::AbiTag,
            NT_GNU_HWCAP => NoteType::Hwcap,
            NT_GNU_BUILD_ID => NoteType::BuildId,
            NT_GNU_GOLD_VERSION => NoteType::GoldVersion,
            NT_GNU_PROPERTY_TYPE_0 => NoteType::Property,
            other => NoteType::Unknown(other),
        }
    }
}

impl From<NoteType> for u32 {
    fn from(value: NoteType) -> Self {
        match value {
            NoteType::AbiTag => NT_GNU_ABI_TAG,
            NoteType::Hwcap => NT_GNU_HWCAP,
            NoteType::BuildId => NT_GNU_BUILD_ID,
            NoteType::GoldVersion => NT_GNU_GOLD_VERSION,
            NoteType::Property => NT_GNU_PROPERTY_TYPE_0,
            NoteType::Unknown(other) => other,
        }
    }
}

impl Display for NoteType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            NoteType::AbiTag => f.write_str("NT_GNU_ABI_TAG"),
            NoteType::Hwcap => f.write_str("NT_GNU_HWCAP"),
            NoteType::BuildId => f.write_str("NT_GNU_BUILD_ID"),
            NoteType::GoldVersion => f.write_str("NT_GNU_GOLD_VERSION"),
            NoteType::Property => f.write_str("NT_GNU_PROPERTY_TYPE_0"),
            NoteType::Unknown(other) => write!(f, "0x{other:x}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn well_known_values_map_to_variants() {
        for raw in 1..=5u32 {
            let ty = NoteType::from(raw);
            assert!(!matches!(ty, NoteType::Unknown(_)));
            assert_eq!(u32::from(ty), raw);
        }
    }

    #[test]
    fn vendor_values_pass_through() {
        assert_eq!(NoteType::from(0), NoteType::Unknown(0));
        assert_eq!(NoteType::from(0x100), NoteType::Unknown(0x100));
        assert_eq!(u32::from(NoteType::Unknown(0xdead_beef)), 0xdead_beef);
    }

    #[test]
    fn display_uses_constant_names() {
        assert_eq!(NoteType::BuildId.to_string(), "NT_GNU_BUILD_ID");
        assert_eq!(NoteType::Unknown(0x2a).to_string(), "0x2a");
    }
}
