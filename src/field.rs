use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::error::EncoderError;

/// The closed set of IPFIX information elements this exporter knows how to
/// write, out of the full IANA registry. Anything else is an
/// `EncoderError::UnknownField`, never a new enum variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
#[repr(u16)]
pub enum FieldId {
    OctetDeltaCount = 1,
    PacketDeltaCount = 2,
    ProtocolIdentifier = 4,
    SourceTransportPort = 7,
    SourceIPv4Address = 8,
    DestinationTransportPort = 11,
    DestinationIPv4Address = 12,
    FlowStartMilliseconds = 152,
    FlowEndMilliseconds = 153,
}

impl FieldId {
    /// The canonical IPFIX wire size for this information element, in bytes.
    pub const fn canonical_size(self) -> u16 {
        match self {
            FieldId::OctetDeltaCount => 4,
            FieldId::PacketDeltaCount => 4,
            FieldId::ProtocolIdentifier => 1,
            FieldId::SourceTransportPort => 2,
            FieldId::SourceIPv4Address => 4,
            FieldId::DestinationTransportPort => 2,
            FieldId::DestinationIPv4Address => 4,
            FieldId::FlowStartMilliseconds => 8,
            FieldId::FlowEndMilliseconds => 8,
        }
    }

    pub fn from_wire(id: u16) -> Result<Self, EncoderError> {
        FromPrimitive::from_u16(id).ok_or(EncoderError::UnknownField(id))
    }

    pub const fn wire_id(self) -> u16 {
        self as u16
    }
}

/// The nine canonical fields, in the order the built-in template declares
/// them.
pub const CANONICAL_FIELDS: [FieldId; 9] = [
    FieldId::SourceIPv4Address,
    FieldId::DestinationIPv4Address,
    FieldId::ProtocolIdentifier,
    FieldId::SourceTransportPort,
    FieldId::DestinationTransportPort,
    FieldId::FlowStartMilliseconds,
    FieldId::FlowEndMilliseconds,
    FieldId::OctetDeltaCount,
    FieldId::PacketDeltaCount,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip_for_every_canonical_field() {
        for &f in &CANONICAL_FIELDS {
            assert_eq!(FieldId::from_wire(f.wire_id()).unwrap(), f);
        }
    }

    #[test]
    fn unknown_identifier_is_rejected() {
        assert!(FieldId::from_wire(999).is_err());
    }
}
