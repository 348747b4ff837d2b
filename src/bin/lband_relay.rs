use clap::{App, Arg, ArgMatches, SubCommand};
use colored::*;
use lband_relay::config::ConfigKey;
use lband_relay::deployment::{Deployment, Region};
use lband_relay::device::DeviceRole;
use lband_relay::pipeline::{Configurator, CorrectionChain, KeyLoadPolicy};
use lband_relay::poll_loop::{summarize, PollLoop, DEFAULT_POLL_CADENCE};
use lband_relay::retry::{RetryPolicy, ThreadSleeper, DEFAULT_RETRY_INTERVAL};
use lband_relay::sim::SimulatedBus;
use lband_relay::status::{render_result, render_schedule, StatusFormat};
use lband_relay::DeviceHandle;
use std::time::Duration;
use tokio::time;
use tracing::{info, warn, Level};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let default_retry_ms = DEFAULT_RETRY_INTERVAL.as_millis().to_string();
    let default_poll_ms = DEFAULT_POLL_CADENCE.as_millis().to_string();

    let matches = App::new("lband-relay")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("🛰️  L-Band correction relay - configures and services a two-receiver correction chain")
        .arg(
            Arg::with_name("region")
                .short("r")
                .long("region")
                .value_name("REGION")
                .help("Correction service region")
                .takes_value(true)
                .possible_values(&["us", "eu"])
                .default_value("us")
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
                .default_value("table")
                .global(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable verbose output")
                .global(true),
        )
        .arg(
            Arg::with_name("strict-keys")
                .long("strict-keys")
                .help("Stop in Failed when the position receiver rejects the key pair")
                .global(true),
        )
        .arg(
            Arg::with_name("retry-ms")
                .long("retry-ms")
                .value_name("MS")
                .help("Delay between discovery attempts")
                .takes_value(true)
                .default_value(&default_retry_ms)
                .global(true)
                .validator(number),
        )
        .arg(
            Arg::with_name("max-attempts")
                .long("max-attempts")
                .value_name("N")
                .help("Give up discovery after N attempts (default: retry forever)")
                .takes_value(true)
                .global(true)
                .validator(count),
        )
        .arg(
            Arg::with_name("poll-ms")
                .long("poll-ms")
                .value_name("MS")
                .help("Poll loop cadence")
                .takes_value(true)
                .default_value(&default_poll_ms)
                .global(true)
                .validator(number),
        )
        .arg(
            Arg::with_name("sim-probe-failures")
                .long("sim-probe-failures")
                .value_name("N")
                .help("Simulated correction receiver misses its first N probes")
                .takes_value(true)
                .global(true)
                .validator(count),
        )
        .arg(
            Arg::with_name("sim-reject")
                .long("sim-reject")
                .value_name("KEY")
                .help("Simulated position receiver rejects writes to KEY (e.g. CFG-UART1-BAUDRATE)")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .global(true)
                .validator(|v| match ConfigKey::from_name(&v) {
                    Some(_) => Ok(()),
                    None => Err(format!("unknown configuration key '{}'", v)),
                }),
        )
        .arg(
            Arg::with_name("sim-reject-keys")
                .long("sim-reject-keys")
                .help("Simulated position receiver rejects the key pair")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("setup")
                .about("🔧 Discover and configure both receivers, then load keys")
                .long_about("Runs the setup pipeline once against the simulated bus and prints the per-stage result"),
        )
        .subcommand(
            SubCommand::with_name("run")
                .about("📡 Set up the chain, then poll both receivers until interrupted")
                .arg(
                    Arg::with_name("ticks")
                        .long("ticks")
                        .value_name("N")
                        .help("Stop after N poll ticks")
                        .takes_value(true)
                        .validator(number),
                ),
        )
        .subcommand(
            SubCommand::with_name("keys")
                .about("🔑 Show the compiled-in key validity schedule"),
        )
        .get_matches();

    if matches.is_present("verbose") {
        tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();
    } else {
        tracing_subscriber::fmt::init();
    }

    let format = StatusFormat::parse(matches.value_of("format").unwrap_or("table")).unwrap_or(StatusFormat::Table);
    let region = Region::parse(matches.value_of("region").unwrap_or("us")).unwrap_or(Region::Us);
    let deployment = Deployment::for_region(region);

    match matches.subcommand() {
        ("setup", Some(_)) => {
            let mut chain = CorrectionChain::new(simulated_bus(&matches), deployment)?;
            let result = configurator(&matches).run(&mut chain);
            println!("{}", render_result(&result, format));
        }
        ("run", Some(sub)) => {
            let ticks = sub.value_of("ticks").map(str::parse::<u64>).transpose()?;
            run(&matches, deployment, format, ticks)?;
        }
        ("keys", Some(_)) => {
            let keys = deployment.key_store()?;
            println!("{}", render_schedule(&keys.schedule(), format));
        }
        _ => {
            println!("{}", "No command given. Use --help for usage.".yellow());
        }
    }

    Ok(())
}

fn number(v: String) -> Result<(), String> {
    match v.parse::<u64>() {
        Ok(_) => Ok(()),
        Err(_) => Err("Value must be a non-negative number".into()),
    }
}

fn count(v: String) -> Result<(), String> {
    match v.parse::<u32>() {
        Ok(_) => Ok(()),
        Err(_) => Err(format!("Value must be a count between 0 and {}", u32::MAX)),
    }
}

fn millis(matches: &ArgMatches, name: &str, default: Duration) -> Duration {
    matches
        .value_of(name)
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn configurator(matches: &ArgMatches) -> Configurator<ThreadSleeper> {
    let mut retry = RetryPolicy::new(millis(matches, "retry-ms", DEFAULT_RETRY_INTERVAL));
    if let Some(max) = matches.value_of("max-attempts").and_then(|v| v.parse::<u32>().ok()) {
        retry = retry.with_max_attempts(max);
    }
    let policy = if matches.is_present("strict-keys") {
        KeyLoadPolicy::Strict
    } else {
        KeyLoadPolicy::Lenient
    };
    Configurator::with_retry(retry).with_key_policy(policy)
}

/// Simulated bus with the scripted faults requested on the command line.
fn simulated_bus(matches: &ArgMatches) -> SimulatedBus {
    let mut bus = SimulatedBus::with_default_receivers();

    if let Some(failures) = matches.value_of("sim-probe-failures").and_then(|v| v.parse::<u32>().ok()) {
        if let Some(device) = bus.role_mut(DeviceRole::CorrectionReceiver) {
            device.faults_mut().probe_failures = failures;
        }
    }
    if let Some(device) = bus.role_mut(DeviceRole::PositionReceiver) {
        let faults = device.faults_mut();
        if let Some(keys) = matches.values_of("sim-reject") {
            faults.rejected_keys = keys.filter_map(ConfigKey::from_name).collect();
        }
        faults.reject_key_load = matches.is_present("sim-reject-keys");
    }
    bus
}

fn run(
    matches: &ArgMatches,
    deployment: Deployment,
    format: StatusFormat,
    ticks: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut chain = CorrectionChain::new(simulated_bus(matches), deployment)?;
    let result = configurator(matches).run(&mut chain);
    println!("{}", render_result(&result, format));

    if !PollLoop::may_start(&result) {
        warn!("setup did not reach Ready, not starting the poll loop");
        return Ok(());
    }

    let cadence = millis(matches, "poll-ms", DEFAULT_POLL_CADENCE);
    let mut poll_loop = PollLoop::new(cadence);

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(async {
        let mut interval = time::interval(cadence);
        loop {
            if ticks.is_some_and(|limit| poll_loop.stats().ticks >= limit) {
                break;
            }
            tokio::select! {
                _ = interval.tick() => poll_loop.tick(&mut chain),
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted, stopping poll loop");
                    break;
                }
            }
        }
    });

    println!(
        "{} {} ticks\n   correction [{}]\n   position   [{}]",
        "📊".bold(),
        poll_loop.stats().ticks,
        summarize(chain.correction().status()),
        summarize(chain.position().status())
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_fits_u32() {
        assert!(count("3".into()).is_ok());
        assert!(count(u32::MAX.to_string()).is_ok());
        assert!(count("4294967296".into()).is_err());
        assert!(count("-1".into()).is_err());
    }
}
