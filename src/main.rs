use log::info;
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use structopt::StructOpt;

use ipfix_exporter::config::{ExporterConfig, Opts};
use ipfix_exporter::egress::{Egress, UdpEgress};
use ipfix_exporter::encoder::Encoder;
use ipfix_exporter::metrics;
use ipfix_exporter::scheduler::{self, SchedulerConfig, SchedulerEvent};
use ipfix_exporter::stats::Stats;
use ipfix_exporter::table::FlowTable;
use ipfix_exporter::template::TemplateSet;

fn main() {
    let opts = Opts::from_args();

    env_logger::Builder::new().format_timestamp_millis().filter(None, opts.log_level).init();
    info!("Starting ipfix-exporter");

    let cfg = ExporterConfig::load(&opts).expect("failed to load configuration");
    info!("Resolved configuration: {:?}", cfg);

    let stats = Arc::new(Stats::new());
    let table = Arc::new(FlowTable::new(cfg.idle_timeout_ms, cfg.active_timeout_ms, cfg.max_flows, Arc::clone(&stats)));
    let template = Arc::new(TemplateSet::build(256, &cfg.template_fields()).expect("built-in template must validate"));
    let encoder = Arc::new(Encoder::new(cfg.observation_domain_id));

    let egress: Arc<dyn Egress> = match UdpEgress::bind(cfg.exporter_addr) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            panic!("failed to bind exporter UDP socket on {}: {}", cfg.exporter_addr, e);
        }
    };

    let mut thread_list = vec![];
    let (event_sender, event_receiver) = channel();

    let scheduler_config = SchedulerConfig {
        poll_period: Duration::from_secs(cfg.poll_period_s),
        template_refresh: Duration::from_secs(cfg.template_refresh_s),
        max_message_bytes: cfg.max_message_bytes,
        collector_addr: cfg.collector_addr,
    };

    {
        let table = Arc::clone(&table);
        let template = Arc::clone(&template);
        let encoder = Arc::clone(&encoder);
        let egress = Arc::clone(&egress);
        let stats = Arc::clone(&stats);
        thread_list.push(
            thread::Builder::new()
                .name("Scheduler".to_string())
                .spawn(move || {
                    scheduler::run(table, template, encoder, egress, stats, scheduler_config, event_receiver);
                })
                .expect("failed to spawn Scheduler thread"),
        );
    }

    if let Some(metrics_addr) = opts.metrics_addr {
        let stats = Arc::clone(&stats);
        thread_list.push(
            thread::Builder::new()
                .name("Metrics".to_string())
                .spawn(move || {
                    metrics::listen(metrics_addr, stats);
                })
                .expect("failed to spawn Metrics thread"),
        );
    }

    let shutdown_sender = event_sender.clone();
    ctrlc::set_handler(move || {
        info!("Shutdown signal received");
        let _ = shutdown_sender.send(SchedulerEvent::Shutdown);
    })
    .expect("failed to install signal handler");

    for t in thread_list {
        t.join().expect("worker thread panicked");
    }

    info!("Closing ipfix-exporter");
}
