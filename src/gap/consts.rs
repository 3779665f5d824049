use bitflags::bitflags;

/// Response data types ([Assigned Numbers] Section 2.3).
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Ord,
    PartialEq,
    PartialOrd,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    strum::Display,
)]
#[non_exhaustive]
#[repr(u8)]
pub enum ResponseDataType {
    Flags = 0x01,
    IncompleteServiceClass16 = 0x02,
    CompleteServiceClass16 = 0x03,
    IncompleteServiceClass32 = 0x04,
    CompleteServiceClass32 = 0x05,
    IncompleteServiceClass128 = 0x06,
    CompleteServiceClass128 = 0x07,
    ShortLocalName = 0x08,
    CompleteLocalName = 0x09,
    TxPower = 0x0A,
    Appearance = 0x19,
    ManufacturerData = 0xFF,
}

impl ResponseDataType {
    /// Service class UUID list types and the width of each UUID in bytes, in
    /// the order that they are decoded.
    pub(crate) const SERVICE_CLASS: [(Self, usize); 6] = [
        (Self::IncompleteServiceClass16, 2),
        (Self::CompleteServiceClass16, 2),
        (Self::IncompleteServiceClass32, 4),
        (Self::CompleteServiceClass32, 4),
        (Self::IncompleteServiceClass128, 16),
        (Self::CompleteServiceClass128, 16),
    ];
}

bitflags! {
    /// Advertising flags ([CSS] Part A, Section 1.3).
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    #[repr(transparent)]
    pub struct AdvFlag: u8 {
        /// LE Limited Discoverable Mode.
        const LE_LIMITED = 1 << 0;
        /// LE General Discoverable Mode.
        const LE_GENERAL = 1 << 1;
        /// BR/EDR Not Supported.
        const NO_BREDR = 1 << 2;
        /// Simultaneous LE and BR/EDR to Same Device Capable (Controller).
        const LE_BREDR_CONTROLLER = 1 << 3;
        /// Previously used.
        const LE_BREDR_HOST = 1 << 4;
    }
}
