//! Frame flags for the TagMesh wire protocol

/// Frame flags (1 byte)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameFlags(pub u8);

impl FrameFlags {
    pub const NONE: FrameFlags = FrameFlags(0);

    // Flag bits
    pub const TARGETED: u8 = 0b0000_0001;
    pub const RELAYED: u8 = 0b0000_0010;

    const KNOWN: u8 = Self::TARGETED | Self::RELAYED;

    #[inline]
    pub fn new(bits: u8) -> Self {
        FrameFlags(bits)
    }

    /// Frame addresses a single node (target field is meaningful)
    #[inline]
    pub fn is_targeted(self) -> bool {
        self.0 & Self::TARGETED != 0
    }

    /// Frame was forwarded by at least one intermediate node
    #[inline]
    pub fn is_relayed(self) -> bool {
        self.0 & Self::RELAYED != 0
    }

    /// Bits outside the defined set
    #[inline]
    pub fn unknown_bits(self) -> u8 {
        self.0 & !Self::KNOWN
    }

    #[inline]
    pub fn set_targeted(&mut self, value: bool) {
        self.set(Self::TARGETED, value);
    }

    #[inline]
    pub fn set_relayed(&mut self, value: bool) {
        self.set(Self::RELAYED, value);
    }

    #[inline]
    fn set(&mut self, bit: u8, value: bool) {
        if value {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }
}

impl From<u8> for FrameFlags {
    fn from(bits: u8) -> Self {
        FrameFlags(bits)
    }
}

impl From<FrameFlags> for u8 {
    fn from(flags: FrameFlags) -> Self {
        flags.0
    }
}
