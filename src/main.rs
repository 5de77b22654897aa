use clap::{Arg, ArgAction, ArgMatches, Command};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use argus::{
    config::EngineConfig,
    discovery::{DeviceInspector, NeighborhoodScanner, ScanEvent, ScanReport, Subnet},
    network::{ping_hosts, IcmpProber, ProbeTarget},
    trace::{HopDiscoverer, HopSnapshot},
    DeviceReport, PingStats,
};

/// Open-file limit wanted for concurrent sockets
#[cfg(unix)]
const FD_TARGET: u64 = 4096;

// Raise the soft open-file limit on Unix systems
#[cfg(unix)]
fn adjust_ulimit_size() -> u64 {
    use rlimit::Resource;

    match Resource::NOFILE.get() {
        Ok((soft, hard)) if soft < FD_TARGET => {
            let wanted = FD_TARGET.min(hard);
            if Resource::NOFILE.set(wanted, hard).is_ok() {
                log::debug!("Raised open-file limit from {} to {}", soft, wanted);
                wanted
            } else {
                soft
            }
        }
        Ok((soft, _)) => soft,
        Err(e) => {
            log::warn!("Could not get file descriptor limit: {}", e);
            1024
        }
    }
}

#[cfg(not(unix))]
fn adjust_ulimit_size() -> u64 {
    65535
}

fn build_cli() -> Command {
    Command::new("argus")
        .version(env!("CARGO_PKG_VERSION"))
        .about("ICMP probing, traceroute/MTR and LAN neighborhood discovery")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("Configuration file (defaults to ~/.argus.toml)")
                .value_parser(clap::value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print results as JSON")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Debug logging")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("trace")
                .about("Discover the route to a host, then keep measuring every hop")
                .arg(Arg::new("host").value_name("HOST").required(true))
                .arg(
                    Arg::new("max-ttl")
                        .short('m')
                        .long("max-ttl")
                        .value_name("TTL")
                        .help("Highest TTL to try")
                        .value_parser(clap::value_parser!(u8).range(1..=64)),
                )
                .arg(
                    Arg::new("cycles")
                        .long("cycles")
                        .value_name("N")
                        .help("Monitoring ticks before exiting (0 runs until Ctrl-C)")
                        .default_value("10")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    Arg::new("no-dns")
                        .short('n')
                        .long("no-dns")
                        .help("Skip reverse DNS for hops")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("no-geo")
                        .long("no-geo")
                        .help("Skip geolocation lookups")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("scan")
                .about("Find devices on the local subnet")
                .arg(
                    Arg::new("interface")
                        .short('i')
                        .long("interface")
                        .value_name("IFACE")
                        .help("Interface to scan from"),
                )
                .arg(
                    Arg::new("subnet")
                        .short('s')
                        .long("subnet")
                        .value_name("CIDR")
                        .help("Scan this subnet instead of detecting one, e.g. 192.168.1.10/24"),
                )
                .arg(
                    Arg::new("no-dns")
                        .short('n')
                        .long("no-dns")
                        .help("Skip reverse DNS")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("service-window")
                        .long("service-window")
                        .value_name("MS")
                        .help("mDNS listen window (0 disables service discovery)")
                        .value_parser(clap::value_parser!(u64)),
                ),
        )
        .subcommand(
            Command::new("device")
                .about("Deep probe of a single device")
                .arg(
                    Arg::new("ip")
                        .value_name("IP")
                        .required(true)
                        .value_parser(clap::value_parser!(Ipv4Addr)),
                ),
        )
        .subcommand(
            Command::new("ping")
                .about("Ping one or more hosts")
                .arg(
                    Arg::new("hosts")
                        .value_name("HOST")
                        .required(true)
                        .num_args(1..),
                )
                .arg(
                    Arg::new("count")
                        .short('c')
                        .long("count")
                        .value_name("N")
                        .default_value("4")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    Arg::new("interval")
                        .short('i')
                        .long("interval")
                        .value_name("MS")
                        .default_value("1000")
                        .value_parser(clap::value_parser!(u64)),
                ),
        )
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<EngineConfig> {
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => EngineConfig::from_toml_file(path)
            .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?,
        None => EngineConfig::load_default_config(),
    };
    config.validate()?;
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn fmt_ms(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |ms| format!("{:.1}", ms))
}

fn print_hops(hops: &[HopSnapshot]) {
    println!(
        "{}",
        format!(
            "{:>3}  {:<40} {:>6} {:>5} {:>7} {:>7} {:>7} {:>7} {:>7}",
            "#", "Host", "Loss%", "Sent", "Last", "Avg", "Best", "Worst", "Jitter"
        )
        .bold()
    );
    for hop in hops {
        let name = if hop.is_placeholder() {
            "*".dimmed().to_string()
        } else {
            match (&hop.hostname, hop.address) {
                (Some(name), Some(ip)) => format!("{} ({})", name, ip),
                _ => hop.display_name(),
            }
        };
        let loss = format!("{:.1}", hop.loss_percent);
        let loss = if hop.loss_percent > 0.0 { loss.bright_red() } else { loss.bright_green() };
        println!(
            "{:>3}  {:<40} {:>6} {:>5} {:>7} {:>7} {:>7} {:>7} {:>7.1}",
            hop.ttl,
            name,
            loss,
            hop.sent,
            fmt_ms(hop.last_ms.or(hop.discovery_rtt_ms)),
            fmt_ms(hop.avg_ms),
            fmt_ms(hop.min_ms),
            fmt_ms(hop.max_ms),
            hop.jitter_ms
        );
        if let Some(geo) = &hop.geo {
            println!("     {}", geo.summary().dimmed());
        }
    }
}

async fn run_trace(
    matches: &ArgMatches,
    mut config: EngineConfig,
    json: bool,
) -> anyhow::Result<()> {
    let host = matches.get_one::<String>("host").map(String::as_str).unwrap_or_default();
    if let Some(&max_ttl) = matches.get_one::<u8>("max-ttl") {
        config.trace.max_ttl = max_ttl;
    }
    if matches.get_flag("no-dns") {
        config.trace.resolve_hostnames = false;
    }
    if matches.get_flag("no-geo") {
        config.trace.geolocate = false;
    }
    let cycles = matches.get_one::<u64>("cycles").copied().unwrap_or(10);

    let target = ProbeTarget::resolve(host).await?;
    let prober = Arc::new(IcmpProber::new(&config.probe)?);
    let discoverer = HopDiscoverer::new(prober, config.trace.clone());

    if !json {
        println!(
            "{} {} ({}), {} hops max",
            "[~] Tracing route to".bright_blue(),
            target.display_name().bright_cyan().bold(),
            target.address,
            config.trace.max_ttl
        );
    }
    let hops = discoverer.discover(&target).await?;
    if !json {
        print_hops(&hops);
    }

    if cycles > 0 || !json {
        discoverer.start_monitoring().await?;
        let mut updates = discoverer.subscribe();
        let mut ticks = 0u64;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    ticks += 1;
                    if !json {
                        let hops = updates.borrow_and_update().clone();
                        println!();
                        print_hops(&hops);
                    }
                    if cycles > 0 && ticks >= cycles {
                        break;
                    }
                }
            }
        }
        discoverer.stop();
    }

    if json {
        print_json(&discoverer.snapshot().await)?;
    }
    Ok(())
}

fn print_scan_report(report: &ScanReport) {
    println!(
        "\n{} {} devices on {} in {:.1}s{}",
        "[✓]".bright_green(),
        report.devices.len().to_string().bright_cyan().bold(),
        report.subnet,
        report.duration_ms as f64 / 1000.0,
        if report.stopped { " (stopped)".bright_yellow().to_string() } else { String::new() }
    );
    println!(
        "{}",
        format!(
            "{:<16} {:<18} {:<26} {:>8}  {:<28} {}",
            "IP", "MAC", "Vendor", "Latency", "Hostname", "Services"
        )
        .bold()
    );
    for device in &report.devices {
        let services = device.services.iter().cloned().collect::<Vec<_>>().join(", ");
        println!(
            "{:<16} {:<18} {:<26} {:>8}  {:<28} {}",
            device.ip.to_string().bright_cyan(),
            device.mac.map(|m| m.to_string()).unwrap_or_else(|| "-".to_string()),
            device.vendor.as_deref().unwrap_or("-"),
            device.latency_ms.map_or_else(|| "-".to_string(), |ms| format!("{:.1}ms", ms)),
            device.hostname.as_deref().unwrap_or("-"),
            services
        );
    }
}

async fn run_scan(
    matches: &ArgMatches,
    mut config: EngineConfig,
    json: bool,
) -> anyhow::Result<()> {
    if let Some(interface) = matches.get_one::<String>("interface") {
        config.scan = config.scan.with_interface(interface.clone());
    }
    if matches.get_flag("no-dns") {
        config.scan = config.scan.with_hostnames(false);
    }
    if let Some(&window) = matches.get_one::<u64>("service-window") {
        config.scan = config.scan.with_service_window(window);
    }

    let prober = Arc::new(IcmpProber::new(&config.probe)?);
    let scanner = Arc::new(NeighborhoodScanner::new(prober, config.scan.clone()));
    let mut events = scanner.subscribe();

    let progress = if json {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} {msg:<30} [{bar:40.cyan/blue}] {pos}/{len} found {prefix}",
                )?
                .progress_chars("#>-"),
        );
        bar
    };

    let progress_task = {
        let progress = progress.clone();
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                match event {
                    ScanEvent::Started { subnet, candidates } => {
                        progress.set_length(candidates as u64);
                        progress.println(format!("{} {}", "[~] Scanning".bright_blue(), subnet));
                    }
                    ScanEvent::Phase(phase) => progress.set_message(phase.to_string()),
                    ScanEvent::Progress { probed, found, .. } => {
                        progress.set_position(probed as u64);
                        progress.set_prefix(found.to_string());
                    }
                    ScanEvent::DeviceFound(_) => {}
                }
            }
        })
    };

    let stopper = {
        let scanner = scanner.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                scanner.stop();
            }
        })
    };

    let report = match matches.get_one::<String>("subnet") {
        Some(cidr) => scanner.scan_subnet(Subnet::from_cidr(cidr)?).await?,
        None => scanner.scan().await?,
    };
    stopper.abort();
    progress.finish_and_clear();
    drop(scanner);
    progress_task.abort();

    if json {
        print_json(&report)
    } else {
        print_scan_report(&report);
        Ok(())
    }
}

fn print_device_report(report: &DeviceReport) {
    println!("{} {}", "[✓] Device".bright_green(), report.ip.to_string().bright_cyan().bold());
    println!("    Type:      {}", report.kind.to_string().bold());
    println!("    Hostname:  {}", report.hostname.as_deref().unwrap_or("-"));
    println!(
        "    MAC:       {}",
        report.mac.map(|m| m.to_string()).unwrap_or_else(|| "-".to_string())
    );
    println!("    Vendor:    {}", report.vendor.as_deref().unwrap_or("-"));
    print_ping_stats(&report.ping);

    if report.open_ports.is_empty() {
        println!("    Open ports: none");
    } else {
        println!("    Open ports:");
        for port in &report.open_ports {
            println!("      {:>5}/tcp  {:<14} {}ms", port.port, port.label, port.connect_ms);
        }
    }
    if !report.services.is_empty() {
        let services = report.services.iter().cloned().collect::<Vec<_>>().join(", ");
        println!("    Services:  {}", services);
    }
}

async fn run_device(matches: &ArgMatches, config: EngineConfig, json: bool) -> anyhow::Result<()> {
    let ip = matches
        .get_one::<Ipv4Addr>("ip")
        .copied()
        .ok_or_else(|| anyhow::anyhow!("missing device address"))?;

    let prober = Arc::new(IcmpProber::new(&config.probe)?);
    let mut inspector = DeviceInspector::new(prober, config.detail.clone());
    if let Some(path) = config.scan.oui_file.as_deref() {
        inspector = inspector.with_vendors(argus::enrich::VendorDatabase::load(Some(path)));
    }
    if !json {
        println!("{} {}", "[~] Inspecting".bright_blue(), ip);
    }

    let report = inspector.inspect(ip).await?;
    if json {
        print_json(&report)
    } else {
        print_device_report(&report);
        Ok(())
    }
}

fn print_ping_stats(stats: &PingStats) {
    let loss = format!("{:.0}% loss", stats.loss_percent);
    let loss = if stats.received == 0 { loss.bright_red() } else { loss.normal() };
    println!(
        "    Ping:      {}/{} received, {}",
        stats.received, stats.sent, loss
    );
    if let Some(latency) = &stats.latency {
        println!(
            "    Latency:   min {:.1} / avg {:.1} / median {:.1} / max {:.1} ms, jitter {:.1} ms",
            latency.min, latency.avg, latency.median, latency.max, latency.jitter
        );
    }
}

async fn run_ping(matches: &ArgMatches, config: EngineConfig, json: bool) -> anyhow::Result<()> {
    let count = matches.get_one::<usize>("count").copied().unwrap_or(4);
    let interval_ms = matches.get_one::<u64>("interval").copied().unwrap_or(1000);
    let interval = Duration::from_millis(interval_ms);

    let mut targets = Vec::new();
    for host in matches.get_many::<String>("hosts").into_iter().flatten() {
        targets.push(ProbeTarget::resolve(host).await?);
    }
    let addresses: Vec<Ipv4Addr> = targets.iter().map(|t| t.address).collect();

    let prober = IcmpProber::new(&config.probe)?;
    let timeout = config.probe.timeout_duration();
    let results = ping_hosts(&prober, &addresses, count, interval, timeout).await;

    if json {
        return print_json(&results);
    }
    for (target, stats) in targets.iter().zip(&results) {
        println!(
            "{} {} ({})",
            "[~]".bright_blue(),
            target.display_name().bright_cyan().bold(),
            target.address
        );
        print_ping_stats(stats);
    }
    Ok(())
}

async fn run(matches: &ArgMatches) -> anyhow::Result<()> {
    let config = load_config(matches)?;
    let json = matches.get_flag("json");

    match matches.subcommand() {
        Some(("trace", sub)) => run_trace(sub, config, json).await,
        Some(("scan", sub)) => run_scan(sub, config, json).await,
        Some(("device", sub)) => run_device(sub, config, json).await,
        Some(("ping", sub)) => run_ping(sub, config, json).await,
        _ => Ok(()),
    }
}

#[tokio::main]
async fn main() {
    let matches = build_cli().get_matches();

    let level = if matches.get_flag("verbose") { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    adjust_ulimit_size();

    let result = run(&matches).await;

    if let Err(e) = result {
        eprintln!("{} {}", "[!] ERROR:".bright_red(), e);
        if let Some(argus::ScanError::PermissionError(_)) = e.downcast_ref::<argus::ScanError>() {
            eprintln!(
                "{}",
                "    Raw ICMP needs root, or: sudo setcap cap_net_raw+ep $(which argus)"
                    .bright_yellow()
            );
        }
        process::exit(1);
    }
}
