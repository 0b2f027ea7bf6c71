use crate::key::FlowKey;
use crate::record::FlowSnapshot;
use crate::table::FlowTable;

/// What a flagged packet triggers on the hot path: a deep, independent
/// capture of the table's current state, plus the identifying details of
/// the packet that triggered it.
///
/// `TraceCapture::capture` never aliases the live table: every record in it
/// is a [`FlowSnapshot`], produced by
/// [`FlowRecord::snapshot`](crate::record::FlowRecord::snapshot), not a
/// shared reference into the live arena. `indices` is its own independent
/// copy of the lookup structure's `key -> arena index` mapping, not a view
/// into it.
#[derive(Debug, Clone)]
pub struct TraceCapture {
    pub ingress_interface: u32,
    pub triggering_key: FlowKey,
    pub records: Vec<FlowSnapshot>,
    pub indices: Vec<(FlowKey, usize)>,
}

impl TraceCapture {
    /// Captures the table's current state. Does not mutate the table in any
    /// way; safe to call concurrently with packet workers and the scheduler.
    pub fn capture(table: &FlowTable, ingress_interface: u32, triggering_key: FlowKey) -> Self {
        TraceCapture {
            ingress_interface,
            triggering_key,
            records: table.snapshot_all(),
            indices: table.snapshot_indices(),
        }
    }

    /// The snapshot of the flow that triggered this trace, if it was still
    /// live at capture time.
    pub fn triggering_record(&self) -> Option<&FlowSnapshot> {
        self.records.iter().find(|r| r.key == self.triggering_key)
    }

    /// The arena index the triggering key mapped to at capture time, if any.
    pub fn triggering_index(&self) -> Option<usize> {
        self.indices.iter().find(|(k, _)| *k == self.triggering_key).map(|(_, idx)| *idx)
    }
}
