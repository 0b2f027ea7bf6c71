use std::io::prelude::*;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;

use log::{error, info};

use crate::stats::Stats;

/// A bare HTTP responder serving the current [`Stats`] as Prometheus
/// exposition text over a hand-written `TcpListener` response loop.
pub fn listen(addr: SocketAddr, stats: Arc<Stats>) {
    let listener = TcpListener::bind(&addr).unwrap_or_else(|e| panic!("failed to bind metrics listener on {}: {}", addr, e));
    info!("Listening for metrics requests on {}", &addr);

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => handle_connection(stream, &stats),
            Err(e) => error!("metrics connection failed: {}", e),
        }
    }
}

fn handle_connection(mut stream: TcpStream, stats: &Stats) {
    let body = stats.render_prometheus();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );

    if let Err(e) = stream.write_all(response.as_bytes()) {
        error!("failed to write metrics response: {}", e);
    }
    let _ = stream.flush();
}
