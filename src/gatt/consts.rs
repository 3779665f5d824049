use bitflags::bitflags;

use crate::gap::uuid16_enum;

bitflags! {
    /// Characteristic properties ([Vol 3] Part G, Section 3.3.1.1).
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    #[repr(transparent)]
    pub struct CharProps: u8 {
        /// Permits broadcasts of the Characteristic Value.
        const BROADCAST = 0x01;
        /// Permits reads of the Characteristic Value.
        const READ = 0x02;
        /// Permit writes of the Characteristic Value without response.
        const WRITE_WITHOUT_RESPONSE = 0x04;
        /// Permits writes of the Characteristic Value with response.
        const WRITE = 0x08;
        /// Permits notifications of a Characteristic Value without
        /// acknowledgment.
        const NOTIFY = 0x10;
        /// Permits indications of a Characteristic Value with acknowledgment.
        const INDICATE = 0x20;
        /// Permits signed writes to the Characteristic Value.
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        /// Additional characteristic properties are defined in the
        /// Characteristic Extended Properties Descriptor.
        const EXTENDED_PROPERTIES = 0x80;
    }
}

/// GATT services ([Assigned Numbers] Section 3.4).
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    strum::Display,
)]
#[non_exhaustive]
#[repr(u16)]
pub enum Service {
    GenericAccess = 0x1800,
    GenericAttribute = 0x1801,
    DeviceInformation = 0x180A,
    HeartRate = 0x180D,
    Battery = 0x180F,
    HumanInterfaceDevice = 0x1812,
}

/// GATT characteristics ([Assigned Numbers] Section 3.8).
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    num_enum::IntoPrimitive,
    num_enum::TryFromPrimitive,
    strum::Display,
)]
#[non_exhaustive]
#[repr(u16)]
pub enum Characteristic {
    DeviceName = 0x2A00,
    Appearance = 0x2A01,
    BatteryLevel = 0x2A19,
    ModelNumberString = 0x2A24,
    ManufacturerNameString = 0x2A29,
    HeartRateMeasurement = 0x2A37,
    Report = 0x2A4D,
}

uuid16_enum! {
    Service
    Characteristic
}
