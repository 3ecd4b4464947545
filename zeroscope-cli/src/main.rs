use std::{
    error::Error,
    process,
    sync::mpsc,
    time::{Duration, Instant},
};

use clap::Parser;
use log::LevelFilter;
use zeroscope::{Browser, Config, IpVersion, ServiceDetails, ServiceEvent};

/// Browse mDNS/DNS-SD services on the local network.
///
/// The default browses HTTP and HomeKit Accessory Protocol services; use
/// `--find` to enumerate everything advertised on the network first.
#[derive(Debug, Parser)]
#[command(name = "zeroscope", version)]
struct Args {
    /// Verbose engine logging
    #[arg(long)]
    debug: bool,

    /// Browse all available services
    #[arg(long)]
    find: bool,

    /// Search for AirPlay services
    #[arg(long)]
    airplay: bool,

    /// Search for AirPrint services
    #[arg(long)]
    airprint: bool,

    /// Search for printer services
    #[arg(long)]
    printer: bool,

    /// Search for HomeKit services
    #[arg(long)]
    homekit: bool,

    /// Search for IPPS services
    #[arg(long)]
    ipps: bool,

    /// Browse over IPv6 in addition to IPv4
    #[arg(long, conflicts_with = "v6_only")]
    v6: bool,

    /// Browse over IPv6 only
    #[arg(long)]
    v6_only: bool,
}

/// How long `--find` listens for service types before browsing them.
const FIND_TIMEOUT: Duration = Duration::from_secs(5);

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let level = if args.debug {
        LevelFilter::Trace
    } else {
        LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_module("zeroscope", level)
        .init();

    let mut config = Config::default();
    config.ip_version = if args.v6_only {
        IpVersion::V6Only
    } else if args.v6 {
        IpVersion::Both
    } else {
        IpVersion::V4Only
    };
    let browser = Browser::new(config)?;

    let services: Vec<String> = if args.find {
        let types = enumerate_types(&browser)?;
        println!("Here is the list of mdns services in your local network");
        println!("*******************************************************");
        println!("{}", types.join("\n"));
        types
    } else if args.airplay {
        vec!["_airplay._tcp.local.".into()]
    } else if args.airprint {
        vec!["_airprint._tcp.local.".into()]
    } else if args.printer {
        vec!["_printer._tcp.local.".into()]
    } else if args.homekit {
        vec!["_homekit._tcp.local.".into()]
    } else if args.ipps {
        vec!["_ipps._tcp.local.".into()]
    } else {
        vec!["_http._tcp.local.".into(), "_hap._tcp.local.".into()]
    };

    println!("\nBrowsing {services:?} service(s), press Ctrl-C to exit...\n");

    let mut subscriptions = Vec::new();
    for service in &services {
        subscriptions.push(browser.subscribe(service, print_event)?);
    }

    let (interrupt_tx, interrupt_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(());
    })?;
    let _ = interrupt_rx.recv();

    for sub in subscriptions {
        let _ = browser.unsubscribe(sub);
    }
    browser.close();
    Ok(())
}

/// Runs the meta-query for [`FIND_TIMEOUT`] and returns the service types
/// seen, sorted.
fn enumerate_types(browser: &Browser) -> Result<Vec<String>, Box<dyn Error>> {
    let (tx, rx) = mpsc::channel();
    let sub = browser.discover_all_types(move |ty| {
        let _ = tx.send(ty);
    })?;

    let mut types = Vec::new();
    let deadline = Instant::now() + FIND_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match rx.recv_timeout(remaining) {
            Ok(ty) => types.push(ty.to_string()),
            Err(_) => break,
        }
    }
    browser.unsubscribe(sub)?;
    types.sort();
    Ok(types)
}

fn print_event(event: ServiceEvent) {
    match &event {
        ServiceEvent::Added(details) => {
            println!(
                "Service {} of type {} state changed: Added",
                details.full_name(),
                details.service_type
            );
            print_details(details);
        }
        ServiceEvent::Updated(details) => {
            println!(
                "Service {} of type {} state changed: Updated",
                details.full_name(),
                details.service_type
            );
        }
        ServiceEvent::Removed {
            service_type,
            instance,
        } => {
            println!(
                "Service {}.{} of type {} state changed: Removed",
                instance, service_type, service_type
            );
        }
    }
}

fn print_details(details: &ServiceDetails) {
    if details.host.is_none() && details.addresses.is_empty() && details.properties.is_empty() {
        println!("  No info\n");
        return;
    }

    let addresses: Vec<String> = details
        .addresses
        .iter()
        .map(|addr| format!("{}:{}", addr, details.port))
        .collect();
    println!("  Addresses: {}", addresses.join(", "));
    println!("  Weight: {}, priority: {}", details.weight, details.priority);
    match &details.host {
        Some(host) => println!("  Server: {host}"),
        None => println!("  Server: unknown"),
    }
    if details.properties.is_empty() {
        println!("  No properties");
    } else {
        println!("  Properties are:");
        for (key, value) in details.properties.iter() {
            match value {
                Some(value) => println!("    {key}: {}", value.escape_ascii()),
                None => println!("    {key}: true"),
            }
        }
    }
    println!();
}
