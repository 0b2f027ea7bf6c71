use crate::error::EncoderError;
use crate::field::{FieldId, CANONICAL_FIELDS};

/// One field inside a template, as the wire format names it: an IPFIX
/// information-element identifier, its declared size, and an enterprise
/// number (0 for IANA-standard elements — this exporter never emits
/// enterprise-specific elements, but the field exists so the wire layout is
/// complete and decodable by a standards-conformant collector).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub identifier: FieldId,
    pub size_bytes: u16,
    pub enterprise_number: u32,
}

impl FieldSpec {
    pub fn new(identifier: FieldId, size_bytes: u16) -> Result<Self, EncoderError> {
        let expected = identifier.canonical_size();
        if size_bytes != expected {
            return Err(EncoderError::SizeMismatch(identifier, expected, size_bytes));
        }
        Ok(FieldSpec { identifier, size_bytes, enterprise_number: 0 })
    }
}

/// An ordered, validated set of fields sharing one template/set ID.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    pub template_id: u16,
    pub fields: Vec<FieldSpec>,
}

/// The first template ID usable by an IPFIX exporter; 2 and 3 are reserved
/// for Template Sets and Options Template Sets respectively (RFC 7011 §3.3.2).
pub const MIN_TEMPLATE_ID: u16 = 256;
pub const TEMPLATE_SET_ID: u16 = 2;

impl TemplateSet {
    pub fn build(template_id: u16, fields: &[(FieldId, u16)]) -> Result<Self, EncoderError> {
        let fields = fields
            .iter()
            .map(|&(id, size)| FieldSpec::new(id, size))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TemplateSet { template_id, fields })
    }

    /// The one built-in template: the nine canonical fields at their
    /// canonical sizes, in their declared order.
    pub fn canonical(template_id: u16) -> Self {
        let fields = CANONICAL_FIELDS
            .iter()
            .map(|&id| FieldSpec { identifier: id, size_bytes: id.canonical_size(), enterprise_number: 0 })
            .collect();
        TemplateSet { template_id, fields }
    }

    /// Total byte size of one data record encoded against this template.
    pub fn record_size(&self) -> usize {
        self.fields.iter().map(|f| f.size_bytes as usize).sum()
    }
}
