use std::net::SocketAddrV4;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{error, warn};

use crate::encoder::{Encoder, MESSAGE_HEADER_SIZE, SET_HEADER_SIZE};
use crate::egress::Egress;
use crate::record::FlowSnapshot;
use crate::stats::Stats;
use crate::table::FlowTable;
use crate::template::TemplateSet;

/// The external event the scheduler's timer wait races against. Shutdown is
/// the only one this version needs.
pub enum SchedulerEvent {
    Shutdown,
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_millis() as i64
}

fn now_s() -> u32 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_secs() as u32
}

/// Everything the scheduler needs to drive one process instance, bundled so
/// `main.rs` doesn't thread six arguments through a thread spawn closure.
pub struct SchedulerConfig {
    pub poll_period: Duration,
    pub template_refresh: Duration,
    pub max_message_bytes: usize,
    pub collector_addr: SocketAddrV4,
}

/// The expiry scheduler's body: `WAITING(poll_deadline) -> PROCESSING ->
/// WAITING(...)`. Runs on its own `thread::Builder`-spawned thread in
/// `main.rs`, one named thread per responsibility.
pub fn run(
    table: Arc<FlowTable>,
    template: Arc<TemplateSet>,
    encoder: Arc<Encoder>,
    egress: Arc<dyn Egress>,
    stats: Arc<Stats>,
    config: SchedulerConfig,
    events: Receiver<SchedulerEvent>,
) {
    // Force a template emission on the very first tick.
    let mut last_template_emit = Instant::now() - config.template_refresh;

    loop {
        match events.recv_timeout(config.poll_period) {
            Ok(SchedulerEvent::Shutdown) => {
                // Final scan with now_ms = infinity: evict everything that
                // remains before releasing resources.
                run_tick(&table, &template, &encoder, &egress, &stats, &config, i64::MAX);
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                if last_template_emit.elapsed() >= config.template_refresh {
                    emit_template(&encoder, &template, &egress, &config, &stats);
                    last_template_emit = Instant::now();
                }
                run_tick(&table, &template, &encoder, &egress, &stats, &config, now_ms());
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// One scheduler wakeup: scan, batch, encode, hand off to egress. Exposed
/// separately from [`run`] so it can be driven deterministically in tests
/// without waiting on real timers.
pub fn run_tick(
    table: &FlowTable,
    template: &TemplateSet,
    encoder: &Encoder,
    egress: &dyn Egress,
    stats: &Stats,
    config: &SchedulerConfig,
    now: i64,
) {
    let expired = if now == i64::MAX { table.drain_all() } else { table.scan_expired(now) };
    if expired.is_empty() {
        return;
    }

    let record_size = template.record_size();
    let mut batch: Vec<FlowSnapshot> = Vec::new();

    for item in expired {
        let projected_len = MESSAGE_HEADER_SIZE + SET_HEADER_SIZE + (batch.len() + 1) * record_size;
        if !batch.is_empty() && projected_len > config.max_message_bytes {
            flush_batch(&batch, template, encoder, egress, stats, config.collector_addr);
            batch.clear();
        }
        batch.push(item.snapshot);
    }

    if !batch.is_empty() {
        flush_batch(&batch, template, encoder, egress, stats, config.collector_addr);
    }
}

fn flush_batch(
    batch: &[FlowSnapshot],
    template: &TemplateSet,
    encoder: &Encoder,
    egress: &dyn Egress,
    stats: &Stats,
    collector_addr: SocketAddrV4,
) {
    let needed = MESSAGE_HEADER_SIZE + SET_HEADER_SIZE + batch.len() * template.record_size();
    let mut buf = vec![0u8; needed];

    match encoder.write_data_message(template, batch, now_s(), &mut buf) {
        Ok(written) => {
            if let Err(e) = egress.send(collector_addr, &buf[..written]) {
                warn!("egress failed, dropping {} snapshot(s): {}", batch.len(), e);
                stats.inc_egress_errors();
            }
        }
        Err(e) => {
            error!("encoder failed, dropping {} snapshot(s): {}", batch.len(), e);
            stats.inc_encoder_errors();
        }
    }
}

fn emit_template(encoder: &Encoder, template: &TemplateSet, egress: &dyn Egress, config: &SchedulerConfig, stats: &Stats) {
    let needed = MESSAGE_HEADER_SIZE + SET_HEADER_SIZE + template.fields.len() * 4 + 4;
    let mut buf = vec![0u8; needed];
    match encoder.write_template_message(template, now_s(), &mut buf) {
        Ok(written) => {
            if let Err(e) = egress.send(config.collector_addr, &buf[..written]) {
                warn!("egress failed while emitting template: {}", e);
                stats.inc_egress_errors();
            }
        }
        Err(e) => {
            error!("failed to build template message: {}", e);
            stats.inc_encoder_errors();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::egress::RecordingEgress;
    use crate::packet::Ipv4HeaderRef;
    use std::net::Ipv4Addr;

    fn make_config() -> SchedulerConfig {
        SchedulerConfig {
            poll_period: Duration::from_secs(10),
            template_refresh: Duration::from_secs(300),
            max_message_bytes: 1400,
            collector_addr: SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 9995),
        }
    }

    fn udp_packet(now: i64) -> Ipv4HeaderRef {
        Ipv4HeaderRef {
            src_addr: Ipv4Addr::new(10, 0, 0, 1),
            dst_addr: Ipv4Addr::new(10, 0, 0, 2),
            protocol: 17,
            src_port: 1000,
            dst_port: 2000,
            total_length: 40,
            ingress_interface: 1,
            observed_at_ms: now,
        }
    }

    #[test]
    fn expired_flows_are_handed_to_egress() {
        let stats = Arc::new(Stats::new());
        let table = FlowTable::new(1000, 10_000, 1024, Arc::clone(&stats));
        table.observe(&udp_packet(0)).unwrap();

        let template = TemplateSet::canonical(256);
        let encoder = Encoder::new(0);
        let egress = RecordingEgress::default();
        let config = make_config();

        run_tick(&table, &template, &encoder, &egress, &stats, &config, 1500);

        let sent = egress.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(&sent[0].1[0..2], &[0x00, 0x0a]);
    }

    #[test]
    fn empty_table_emits_nothing() {
        let stats = Arc::new(Stats::new());
        let table = FlowTable::new(1000, 10_000, 1024, Arc::clone(&stats));
        let template = TemplateSet::canonical(256);
        let encoder = Encoder::new(0);
        let egress = RecordingEgress::default();
        let config = make_config();

        run_tick(&table, &template, &encoder, &egress, &stats, &config, 1500);
        assert!(egress.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn large_batches_split_across_multiple_messages() {
        let stats = Arc::new(Stats::new());
        let table = FlowTable::new(1000, 10_000, 1024, Arc::clone(&stats));
        for i in 0..200u16 {
            let pkt = Ipv4HeaderRef { dst_addr: Ipv4Addr::new(10, 0, i as u8 / 2, (i % 255) as u8), ..udp_packet(0) };
            table.observe(&pkt).unwrap();
        }

        let template = TemplateSet::canonical(256);
        let encoder = Encoder::new(0);
        let egress = RecordingEgress::default();
        let mut config = make_config();
        config.max_message_bytes = 200; // force several small messages

        run_tick(&table, &template, &encoder, &egress, &stats, &config, 1500);

        let sent = egress.sent.lock().unwrap();
        assert!(sent.len() > 1, "200 flows under a 200-byte budget must split into multiple messages");
    }

    #[test]
    fn shutdown_drain_evicts_everything_regardless_of_timers() {
        let stats = Arc::new(Stats::new());
        let table = FlowTable::new(10_000, 30_000, 1024, Arc::clone(&stats));
        table.observe(&udp_packet(0)).unwrap();

        let template = TemplateSet::canonical(256);
        let encoder = Encoder::new(0);
        let egress = RecordingEgress::default();
        let config = make_config();

        run_tick(&table, &template, &encoder, &egress, &stats, &config, i64::MAX);

        assert!(table.is_empty());
        assert_eq!(egress.sent.lock().unwrap().len(), 1);
    }
}
