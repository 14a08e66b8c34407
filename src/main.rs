//! tcp-fanout command line
//!
//! Run with: tcp-fanout --connect ORIGIN:PORT [--listen ADDR] [options]
//!
//! Examples:
//!   tcp-fanout --connect 10.0.0.5:7000                          # serve on 0.0.0.0:9000
//!   tcp-fanout --connect camera:554 --listen 127.0.0.1:9100
//!   tcp-fanout --connect 10.0.0.5:7000 --introspection 127.0.0.1:6060

use std::process::ExitCode;

use tcp_fanout::config::parse_duration;
use tcp_fanout::{Relay, RelayConfig};

fn print_usage() {
    eprintln!("Usage: tcp-fanout --connect ADDR [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --connect ADDR           Upstream address to relay from (required)");
    eprintln!("  --listen ADDR            Address consumers connect to [default: 0.0.0.0:9000]");
    eprintln!("  --connect-retries N      Consecutive dial failures before giving up [default: 5]");
    eprintln!("  --connect-idle DUR       Delay between dial attempts [default: 1s]");
    eprintln!("  --connect-timeout DUR    Deadline for one dial attempt [default: 5s]");
    eprintln!("  --bufsize BYTES          Upstream read size [default: 32768]");
    eprintln!("  --read-timeout DUR       Upstream read deadline [default: 10s]");
    eprintln!("  --write-timeout DUR      Downstream write deadline [default: 10s]");
    eprintln!("  --queue-capacity N       Chunks buffered per consumer [default: 128]");
    eprintln!("  --introspection ADDR     Serve stats over HTTP on ADDR [default: disabled]");
    eprintln!("  -h, --help               Show this help");
    eprintln!();
    eprintln!("Durations accept ms, s and m suffixes, e.g. 250ms, 5s, 1m.");
}

fn parse_args(args: &[String]) -> Result<RelayConfig, String> {
    let mut config = RelayConfig::default();
    let mut connect = None;

    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let mut value = || {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("missing value for {}", flag))
        };
        match flag.as_str() {
            "--connect" => connect = Some(value()?),
            "--listen" => config.server.listen_addr = value()?,
            "--connect-retries" => config.client.connect_retries = parse_number(flag, &value()?)?,
            "--connect-idle" => config.client.connect_idle = parse_flag_duration(flag, &value()?)?,
            "--connect-timeout" => {
                config.client.connect_timeout = parse_flag_duration(flag, &value()?)?
            }
            "--bufsize" => config.client.bufsize = parse_number(flag, &value()?)?,
            "--read-timeout" => config.client.read_timeout = parse_flag_duration(flag, &value()?)?,
            "--write-timeout" => {
                config.server.write_timeout = parse_flag_duration(flag, &value()?)?
            }
            "--queue-capacity" => config.queue_capacity = parse_number(flag, &value()?)?,
            "--introspection" => config = config.introspection(value()?),
            other => return Err(format!("unknown argument: {}", other)),
        }
    }

    config.client.connect_addr = connect.ok_or("--connect is required")?;
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("invalid value for {}: {}", flag, value))
}

fn parse_flag_duration(flag: &str, value: &str) -> Result<std::time::Duration, String> {
    parse_duration(value).map_err(|e| format!("{}: {}", flag, e))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return ExitCode::SUCCESS;
    }

    let config = match parse_args(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::from(2);
        }
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tcp_fanout=info")),
        )
        .init();

    let (relay, mut terminal) = match Relay::start(config).await {
        Ok(started) => started,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start relay");
            return ExitCode::FAILURE;
        }
    };

    tokio::select! {
        Some(e) = terminal.recv() => {
            tracing::error!(error = %e, "Relay terminated");
            relay.wait().await;
            return ExitCode::FAILURE;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    relay.stop().await;
    ExitCode::SUCCESS
}
