use anyhow::{bail, Context, Result};
use clap::ArgMatches;
use log::{error, info, warn};
use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::devices::{Device, DeviceData, PowerMeter, SimulatedMeter};
use crate::modbus::client::ModbusMasterTrait;
use crate::modbus::crc::crc16_modbus;
use crate::modbus::protocol::{FunctionCode, MAX_READ_BITS, MAX_READ_REGISTERS};
use crate::modbus::serial::{list_ports, open_master};
use crate::output::{formatter_for, ConsoleSender, DataFormatter, DataSender, FileSender};
use crate::services::{PollEvent, PollingService};

pub async fn handle_subcommands(matches: &ArgMatches) -> Result<()> {
    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or(super::DEFAULT_CONFIG_PATH);

    match matches.subcommand() {
        Some(("crc", sub)) => {
            let input: Vec<String> = sub.get_many::<String>("hex").unwrap_or_default().cloned().collect();
            println!("{}", crc_report(&input.join(""))?);
            Ok(())
        }
        Some(("ports", _)) => {
            let ports = list_ports()?;
            if ports.is_empty() {
                println!("⚠️  No serial ports found");
            }
            for (index, port) in ports.iter().enumerate() {
                println!("{}. {}", index + 1, port);
            }
            Ok(())
        }
        Some(("init-config", sub)) => {
            if Path::new(config_path).exists() && !sub.get_flag("force") {
                bail!("{} already exists, use --force to overwrite", config_path);
            }
            let config = Config::default().apply_matches(matches)?;
            config.save_to_file(config_path)?;
            println!("✅ Wrote default configuration to {}", config_path);
            Ok(())
        }
        Some((name, sub)) => {
            let config = load_config(config_path, matches)?;
            match name {
                "read" => read_once(&config, sub).await,
                "meter" => read_meter(&config).await,
                "poll" => poll_meter(&config).await,
                other => bail!("unknown command '{}'", other),
            }
        }
        None => bail!("no command given, see --help"),
    }
}

fn load_config(path: &str, matches: &ArgMatches) -> Result<Config> {
    let config = if Path::new(path).exists() {
        Config::from_file(path).with_context(|| format!("loading {}", path))?
    } else {
        info!("📄 {} not found, using defaults", path);
        Config::default()
    };
    let config = config.apply_matches(matches)?;
    config.validate()?;
    Ok(config)
}

/// Accepts decimal or `0x` prefixed hex.
pub fn parse_number(value: &str) -> Result<u16> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(digits) => u16::from_str_radix(digits, 16),
        None => value.parse(),
    };
    parsed.with_context(|| format!("invalid number '{}'", value))
}

/// Rejects quantities a single read cannot carry.
pub fn check_quantity(function: FunctionCode, count: u16) -> Result<()> {
    let limit = if function.is_bit_access() {
        MAX_READ_BITS
    } else {
        MAX_READ_REGISTERS
    };
    if count == 0 || count > limit {
        bail!("count {} outside 1-{} for {}", count, limit, function);
    }
    Ok(())
}

pub fn crc_report(input: &str) -> Result<String> {
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = hex::decode(&cleaned).with_context(|| format!("invalid hex '{}'", input))?;
    let crc = crc16_modbus(&bytes);
    Ok(format!(
        "CRC16/MODBUS: 0x{:04X} (on the wire: {:02X} {:02X})",
        crc,
        crc & 0xFF,
        crc >> 8
    ))
}

fn open_meter_master(config: &Config) -> Result<Box<dyn ModbusMasterTrait + Send>> {
    if config.meter.simulate {
        info!("🧪 Using simulated meter telemetry, serial port left closed");
        let step = Duration::from_secs(config.poll_interval_seconds);
        return Ok(Box::new(SimulatedMeter::from_config(&config.meter, step)));
    }
    Ok(Box::new(open_master(&config.serial_settings(), config.timeout_ms)?))
}

fn build_output(config: &Config) -> Result<(Box<dyn DataFormatter>, Vec<Box<dyn DataSender>>)> {
    let formatter = formatter_for(&config.output.format)
        .with_context(|| format!("unknown output format '{}'", config.output.format))?;

    let mut senders: Vec<Box<dyn DataSender>> = vec![Box::new(ConsoleSender)];
    if let Some(path) = &config.output.file_path {
        info!("📤 Also writing readings to {}", path);
        senders.push(Box::new(FileSender::new(path, true)));
    }
    Ok((formatter, senders))
}

async fn deliver(formatter: &dyn DataFormatter, senders: &[Box<dyn DataSender>], data: &dyn DeviceData) {
    let text = formatter.format_single_device(data);
    for sender in senders {
        if let Err(e) = sender.send(&text).await {
            error!("❌ {} sender to {} failed: {}", sender.sender_type(), sender.destination(), e);
        }
    }
}

async fn read_once(config: &Config, sub: &ArgMatches) -> Result<()> {
    let arg = |name: &str| -> Result<u16> {
        let value = sub.get_one::<String>(name).context("missing argument")?;
        parse_number(value)
    };
    let slave = u8::try_from(arg("slave")?).context("slave id must fit in one byte")?;
    let function = FunctionCode::try_from(u8::try_from(arg("function")?)?)?;
    if !function.is_read() {
        bail!("function {} is not a read", function);
    }
    let start = arg("start")?;
    let count = arg("count")?;
    check_quantity(function, count)?;

    let settings = config.serial_settings();
    let timeout_ms = config.timeout_ms;

    // The receive loop blocks, keep it off the runtime threads
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut master = open_master(&settings, timeout_ms)?;
        let result = master.request_from(slave, function, start, count);

        println!("TX: {}", hex::encode_upper(master.tx_raw()));
        println!("RX: {}", hex::encode_upper(master.rx_raw()));
        if master.echoes_discarded() > 0 {
            println!("(discarded {} echoed request frame(s))", master.echoes_discarded());
        }

        match result {
            Ok(byte_count) => {
                let payload = master.payload()?;
                println!("✅ {} data bytes: {}", byte_count, hex::encode_upper(payload.as_bytes()));
                if !function.is_bit_access() {
                    let registers = payload.registers();
                    println!("Registers: {:?}", registers);
                }
                Ok(())
            }
            Err(e) => {
                if e.is_bus_failure() {
                    warn!("No valid answer from slave {} ({:?})", slave, master.last_state());
                }
                Err(e.into())
            }
        }
    })
    .await?
}

async fn read_meter(config: &Config) -> Result<()> {
    let (formatter, senders) = build_output(config)?;
    let mut master = open_meter_master(config)?;
    let mut meter = PowerMeter::from_config(&config.meter);

    let data = tokio::task::spawn_blocking(move || -> Result<Box<dyn DeviceData>> {
        info!("🔍 Reading {} '{}' at address {}", meter.device_type(), meter.name(), meter.address());
        Ok(meter.read_data(master.as_mut())?)
    })
    .await??;

    print!("{}", formatter.format_header());
    deliver(formatter.as_ref(), &senders, data.as_ref()).await;
    Ok(())
}

async fn poll_meter(config: &Config) -> Result<()> {
    let (formatter, senders) = build_output(config)?;
    let master = open_meter_master(config)?;
    let meter = PowerMeter::from_config(&config.meter);
    let interval = Duration::from_secs(config.poll_interval_seconds);

    info!("🛑 Press Ctrl+C to stop");
    print!("{}", formatter.format_header());

    let mut handle = PollingService::new(meter, master, interval).start();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Stopping meter polling...");
                break;
            }
            event = handle.next_event() => match event {
                Some(PollEvent::Reading(reading)) => {
                    deliver(formatter.as_ref(), &senders, &reading).await;
                }
                Some(PollEvent::Failed { error, consecutive_failures, latest }) => {
                    warn!("⚠️  Poll failed ({} in a row): {}", consecutive_failures, error);
                    if consecutive_failures > config.meter.max_failures {
                        deliver(formatter.as_ref(), &senders, &latest).await;
                    }
                }
                None => break,
            }
        }
    }

    let meter = handle.stop().await?;
    info!("📊 Stopped with {} consecutive failures", meter.consecutive_failures());
    Ok(())
}
