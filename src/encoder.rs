use std::sync::atomic::{AtomicU32, Ordering};

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::error::EncoderError;
use crate::field::FieldId;
use crate::record::FlowSnapshot;
use crate::template::{TemplateSet, TEMPLATE_SET_ID};

pub const IPFIX_VERSION: u16 = 10;
pub const MESSAGE_HEADER_SIZE: usize = 16;
pub const SET_HEADER_SIZE: usize = 4;
/// Template Record Header: template id (2) + field count (2).
pub const TEMPLATE_RECORD_HEADER_SIZE: usize = 4;
/// One Template Field: information element id (2) + field length (2).
pub const TEMPLATE_FIELD_SIZE: usize = 4;

fn wire_options() -> impl bincode::Options {
    bincode::DefaultOptions::new().with_fixint_encoding().allow_trailing_bytes().with_big_endian()
}

/// NetFlow v10 Message Header. Fixed 16-byte layout (RFC 7011 §3.1), encoded
/// and decoded with a big-endian fixint bincode configuration shared by
/// every other fixed header in this codebase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub version: u16,
    pub length: u16,
    pub export_time_s: u32,
    pub sequence_number: u32,
    pub observation_domain_id: u32,
}

impl MessageHeader {
    pub fn write(&self, buf: &mut [u8]) -> Result<usize, EncoderError> {
        if buf.len() < MESSAGE_HEADER_SIZE {
            return Err(EncoderError::BufferTooSmall { needed: MESSAGE_HEADER_SIZE, available: buf.len() });
        }
        let bytes = wire_options().serialize(self).expect("fixed-size header serialization cannot fail");
        buf[..MESSAGE_HEADER_SIZE].copy_from_slice(&bytes);
        Ok(MESSAGE_HEADER_SIZE)
    }

    pub fn read(buf: &[u8]) -> Result<Self, EncoderError> {
        wire_options()
            .deserialize_from(buf)
            .map_err(|_| EncoderError::BufferTooSmall { needed: MESSAGE_HEADER_SIZE, available: buf.len() })
    }
}

/// IPFIX Set Header: set id (2) + total set length including this header (2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetHeader {
    pub set_id: u16,
    pub length: u16,
}

impl SetHeader {
    pub fn write(&self, buf: &mut [u8]) -> Result<usize, EncoderError> {
        if buf.len() < SET_HEADER_SIZE {
            return Err(EncoderError::BufferTooSmall { needed: SET_HEADER_SIZE, available: buf.len() });
        }
        let bytes = wire_options().serialize(self).expect("fixed-size header serialization cannot fail");
        buf[..SET_HEADER_SIZE].copy_from_slice(&bytes);
        Ok(SET_HEADER_SIZE)
    }

    pub fn read(buf: &[u8]) -> Result<Self, EncoderError> {
        wire_options()
            .deserialize_from(buf)
            .map_err(|_| EncoderError::BufferTooSmall { needed: SET_HEADER_SIZE, available: buf.len() })
    }
}

/// Appends one field's value, in template order, to `out`. All integer
/// fields are written big-endian directly from the record's host-order
/// counters; this is the single byteswap boundary the record model
/// deliberately defers to.
fn write_field(identifier: FieldId, snapshot: &FlowSnapshot, out: &mut Vec<u8>) {
    match identifier {
        FieldId::SourceIPv4Address => out.extend_from_slice(&snapshot.key.src_addr().octets()),
        FieldId::DestinationIPv4Address => out.extend_from_slice(&snapshot.key.dst_addr().octets()),
        FieldId::ProtocolIdentifier => out.push(snapshot.key.protocol()),
        FieldId::SourceTransportPort => out.extend_from_slice(&snapshot.key.src_port().to_be_bytes()),
        FieldId::DestinationTransportPort => out.extend_from_slice(&snapshot.key.dst_port().to_be_bytes()),
        FieldId::FlowStartMilliseconds => out.extend_from_slice(&(snapshot.flow_start_ms as u64).to_be_bytes()),
        FieldId::FlowEndMilliseconds => out.extend_from_slice(&(snapshot.flow_end_ms as u64).to_be_bytes()),
        FieldId::OctetDeltaCount => out.extend_from_slice(&snapshot.octet_delta_count.to_be_bytes()),
        FieldId::PacketDeltaCount => out.extend_from_slice(&snapshot.packet_delta_count.to_be_bytes()),
    }
}

/// Owns the per-domain sequence counter an IPFIX exporter must maintain
/// across its lifetime (RFC 7011 §3.1: "incremental sequence counter ... of
/// all IPFIX Data Records"), and turns flow snapshots into wire bytes.
/// Multiple records are packed into one Data Set when the caller batches
/// them (see [`Encoder::write_data_message`]).
pub struct Encoder {
    observation_domain_id: u32,
    sequence_number: AtomicU32,
}

impl Encoder {
    pub fn new(observation_domain_id: u32) -> Self {
        Encoder { observation_domain_id, sequence_number: AtomicU32::new(0) }
    }

    /// Writes one NetFlow v10 message containing a single Data Set with one
    /// record per snapshot, all against `template`. Returns exact bytes
    /// written. Caller must size `buf` >= `sizeof(header) + set header +
    /// Σ record sizes`, rounded to the set's 4-byte padding if needed by the
    /// caller's batching policy.
    pub fn write_data_message(
        &self,
        template: &TemplateSet,
        snapshots: &[FlowSnapshot],
        export_time_s: u32,
        buf: &mut [u8],
    ) -> Result<usize, EncoderError> {
        let mut body = Vec::with_capacity(template.record_size() * snapshots.len());
        for snap in snapshots {
            for field in &template.fields {
                write_field(field.identifier, snap, &mut body);
            }
        }

        let set_length = (SET_HEADER_SIZE + body.len()) as u16;
        let message_length = (MESSAGE_HEADER_SIZE + set_length as usize) as u16;

        if buf.len() < message_length as usize {
            return Err(EncoderError::BufferTooSmall { needed: message_length as usize, available: buf.len() });
        }

        let header = MessageHeader {
            version: IPFIX_VERSION,
            length: message_length,
            export_time_s,
            sequence_number: self.sequence_number.fetch_add(1, Ordering::Relaxed),
            observation_domain_id: self.observation_domain_id,
        };
        let mut offset = header.write(buf)?;

        let set_header = SetHeader { set_id: template.template_id, length: set_length };
        offset += set_header.write(&mut buf[offset..])?;

        buf[offset..offset + body.len()].copy_from_slice(&body);
        offset += body.len();

        Ok(offset)
    }

    /// Writes a Template Set (Set ID 2) describing `template`, so a
    /// long-running collector can (re)populate its own template cache
    /// without an out-of-band negotiation handshake.
    pub fn write_template_message(
        &self,
        template: &TemplateSet,
        export_time_s: u32,
        buf: &mut [u8],
    ) -> Result<usize, EncoderError> {
        let mut body = Vec::with_capacity(TEMPLATE_RECORD_HEADER_SIZE + template.fields.len() * TEMPLATE_FIELD_SIZE);
        body.extend_from_slice(&template.template_id.to_be_bytes());
        body.extend_from_slice(&(template.fields.len() as u16).to_be_bytes());
        for field in &template.fields {
            body.extend_from_slice(&field.identifier.wire_id().to_be_bytes());
            body.extend_from_slice(&field.size_bytes.to_be_bytes());
        }

        let set_length = (SET_HEADER_SIZE + body.len()) as u16;
        let message_length = (MESSAGE_HEADER_SIZE + set_length as usize) as u16;

        if buf.len() < message_length as usize {
            return Err(EncoderError::BufferTooSmall { needed: message_length as usize, available: buf.len() });
        }

        let header = MessageHeader {
            version: IPFIX_VERSION,
            length: message_length,
            export_time_s,
            // Template Sets carry no flow records and do not advance the
            // data-record sequence counter (RFC 7011 §3.1).
            sequence_number: self.sequence_number.load(Ordering::Relaxed),
            observation_domain_id: self.observation_domain_id,
        };
        let mut offset = header.write(buf)?;

        let set_header = SetHeader { set_id: TEMPLATE_SET_ID, length: set_length };
        offset += set_header.write(&mut buf[offset..])?;

        buf[offset..offset + body.len()].copy_from_slice(&body);
        offset += body.len();

        Ok(offset)
    }
}
