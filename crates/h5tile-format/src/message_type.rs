//! Header message type identifiers.

/// Header message kinds by their on-disk type id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Nil,
    Dataspace,
    LinkInfo,
    Datatype,
    FillValueOld,
    FillValue,
    Link,
    ExternalFiles,
    DataLayout,
    Bogus,
    GroupInfo,
    FilterPipeline,
    Attribute,
    Comment,
    ModificationTimeOld,
    SharedMessageTable,
    Continuation,
    SymbolTable,
    ModificationTime,
    BTreeKValues,
    DriverInfo,
    AttributeInfo,
    ReferenceCount,
    /// Any other id.
    Unknown(u16),
}

impl MessageType {
    pub fn from_u16(val: u16) -> MessageType {
        match val {
            0x00 => MessageType::Nil,
            0x01 => MessageType::Dataspace,
            0x02 => MessageType::LinkInfo,
            0x03 => MessageType::Datatype,
            0x04 => MessageType::FillValueOld,
            0x05 => MessageType::FillValue,
            0x06 => MessageType::Link,
            0x07 => MessageType::ExternalFiles,
            0x08 => MessageType::DataLayout,
            0x09 => MessageType::Bogus,
            0x0A => MessageType::GroupInfo,
            0x0B => MessageType::FilterPipeline,
            0x0C => MessageType::Attribute,
            0x0D => MessageType::Comment,
            0x0E => MessageType::ModificationTimeOld,
            0x0F => MessageType::SharedMessageTable,
            0x10 => MessageType::Continuation,
            0x11 => MessageType::SymbolTable,
            0x12 => MessageType::ModificationTime,
            0x13 => MessageType::BTreeKValues,
            0x14 => MessageType::DriverInfo,
            0x15 => MessageType::AttributeInfo,
            0x16 => MessageType::ReferenceCount,
            other => MessageType::Unknown(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            MessageType::Nil => 0x00,
            MessageType::Dataspace => 0x01,
            MessageType::LinkInfo => 0x02,
            MessageType::Datatype => 0x03,
            MessageType::FillValueOld => 0x04,
            MessageType::FillValue => 0x05,
            MessageType::Link => 0x06,
            MessageType::ExternalFiles => 0x07,
            MessageType::DataLayout => 0x08,
            MessageType::Bogus => 0x09,
            MessageType::GroupInfo => 0x0A,
            MessageType::FilterPipeline => 0x0B,
            MessageType::Attribute => 0x0C,
            MessageType::Comment => 0x0D,
            MessageType::ModificationTimeOld => 0x0E,
            MessageType::SharedMessageTable => 0x0F,
            MessageType::Continuation => 0x10,
            MessageType::SymbolTable => 0x11,
            MessageType::ModificationTime => 0x12,
            MessageType::BTreeKValues => 0x13,
            MessageType::DriverInfo => 0x14,
            MessageType::AttributeInfo => 0x15,
            MessageType::ReferenceCount => 0x16,
            MessageType::Unknown(v) => v,
        }
    }

    /// Bit used for this type in shared-message index flags.
    pub fn shared_flag(self) -> u16 {
        let id = self.to_u16();
        if id < 16 {
            1 << id
        } else {
            0
        }
    }
}
