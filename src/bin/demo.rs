//! Synthetic traffic generator driving the exporter core end-to-end for
//! local testing. This is demo-only tooling, not part of the core itself:
//! the real host packet-forwarding graph is an external collaborator the
//! core never sees.
use log::info;
use std::net::Ipv4Addr;
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use structopt::StructOpt;

use ipfix_exporter::config::{ExporterConfig, Opts};
use ipfix_exporter::egress::{Egress, UdpEgress};
use ipfix_exporter::encoder::Encoder;
use ipfix_exporter::error::CoreError;
use ipfix_exporter::packet::Ipv4HeaderRef;
use ipfix_exporter::scheduler::{self, SchedulerConfig, SchedulerEvent};
use ipfix_exporter::stats::Stats;
use ipfix_exporter::table::FlowTable;
use ipfix_exporter::template::TemplateSet;

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_millis() as i64
}

fn main() {
    let opts = Opts::from_args();
    env_logger::Builder::new().format_timestamp_millis().filter(None, opts.log_level).init();

    let cfg = ExporterConfig::load(&opts).expect("failed to load configuration");
    info!("demo: resolved configuration {:?}", cfg);

    let stats = Arc::new(Stats::new());
    let table = Arc::new(FlowTable::new(cfg.idle_timeout_ms, cfg.active_timeout_ms, cfg.max_flows, Arc::clone(&stats)));
    let template = Arc::new(TemplateSet::build(256, &cfg.template_fields()).expect("built-in template must validate"));
    let encoder = Arc::new(Encoder::new(cfg.observation_domain_id));
    let egress: Arc<dyn Egress> = Arc::new(UdpEgress::bind(cfg.exporter_addr).expect("failed to bind exporter UDP socket"));

    let (event_sender, event_receiver) = channel();
    let scheduler_config = SchedulerConfig {
        poll_period: Duration::from_secs(cfg.poll_period_s),
        template_refresh: Duration::from_secs(cfg.template_refresh_s),
        max_message_bytes: cfg.max_message_bytes,
        collector_addr: cfg.collector_addr,
    };

    let scheduler_handle = {
        let table = Arc::clone(&table);
        let template = Arc::clone(&template);
        let encoder = Arc::clone(&encoder);
        let egress = Arc::clone(&egress);
        let stats = Arc::clone(&stats);
        thread::Builder::new()
            .name("Scheduler".to_string())
            .spawn(move || scheduler::run(table, template, encoder, egress, stats, scheduler_config, event_receiver))
            .expect("failed to spawn Scheduler thread")
    };

    // Synthesize a handful of overlapping flows at a modest rate.
    let flow_count = 8u8;
    let packets_per_flow = 50u32;

    for round in 0..packets_per_flow {
        for flow in 0..flow_count {
            let packet = Ipv4HeaderRef {
                src_addr: Ipv4Addr::new(10, 0, 0, flow + 1),
                dst_addr: Ipv4Addr::new(10, 0, 1, flow + 1),
                protocol: 17,
                src_port: 40000 + flow as u16,
                dst_port: 53,
                total_length: 64 + round as u16,
                ingress_interface: 1,
                observed_at_ms: now_ms(),
            };
            match table.observe(&packet) {
                Ok(()) => {}
                // Fatal is a programming-error class (key<->index corruption),
                // never a runtime condition a packet worker absorbs.
                Err(e @ CoreError::Fatal(_)) => panic!("fatal flow table inconsistency: {}", e),
                Err(e) => log::warn!("demo: dropped synthetic packet: {}", e),
            }
        }
        thread::sleep(Duration::from_millis(50));
    }

    info!("demo: finished sending synthetic traffic, shutting down");
    let _ = event_sender.send(SchedulerEvent::Shutdown);
    scheduler_handle.join().expect("scheduler thread panicked");
}
