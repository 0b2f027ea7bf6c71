use std::net::{SocketAddrV4, UdpSocket};
use std::sync::Mutex;

use crate::error::EgressError;

/// The opaque sink the core hands finished IPFIX payloads to — the core
/// never knows or cares how the bytes actually leave the machine.
pub trait Egress: Send + Sync {
    fn send(&self, dst: SocketAddrV4, payload: &[u8]) -> Result<(), EgressError>;
}

/// The production collaborator: a bound UDP socket.
pub struct UdpEgress {
    socket: UdpSocket,
}

impl UdpEgress {
    pub fn bind(exporter_addr: SocketAddrV4) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(exporter_addr)?;
        Ok(UdpEgress { socket })
    }
}

impl Egress for UdpEgress {
    fn send(&self, dst: SocketAddrV4, payload: &[u8]) -> Result<(), EgressError> {
        self.socket.send_to(payload, dst).map_err(|e| EgressError::SendFailed(e.to_string()))?;
        Ok(())
    }
}

/// Discards everything. Useful when the core is run with no configured
/// collector (e.g. demo mode) or in unit tests that don't care about egress.
#[derive(Default)]
pub struct NullEgress;

impl Egress for NullEgress {
    fn send(&self, _dst: SocketAddrV4, _payload: &[u8]) -> Result<(), EgressError> {
        Ok(())
    }
}

/// Captures every payload it's given, for assertions in tests.
#[derive(Default)]
pub struct RecordingEgress {
    pub sent: Mutex<Vec<(SocketAddrV4, Vec<u8>)>>,
}

impl Egress for RecordingEgress {
    fn send(&self, dst: SocketAddrV4, payload: &[u8]) -> Result<(), EgressError> {
        self.sent.lock().unwrap().push((dst, payload.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn recording_egress_captures_every_send() {
        let egress = RecordingEgress::default();
        let dst = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 5), 9995);
        egress.send(dst, &[1, 2, 3]).unwrap();
        egress.send(dst, &[4, 5]).unwrap();

        let sent = egress.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1, vec![1, 2, 3]);
    }
}
