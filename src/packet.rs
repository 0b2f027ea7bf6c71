use std::net::Ipv4Addr;

/// What the host packet-forwarding graph hands the core for each observed
/// IPv4 packet. Parsing that header out of the wire bytes, and delivering
/// only genuine IPv4 traffic here, is the forwarding graph's job, not the
/// core's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4HeaderRef {
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub protocol: u8,
    pub src_port: u16,
    pub dst_port: u16,
    /// IPv4 total length field: the octet count folded into `octetDeltaCount`.
    pub total_length: u16,
    pub ingress_interface: u32,
    pub observed_at_ms: i64,
}
