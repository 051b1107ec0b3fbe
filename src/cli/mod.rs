pub mod commands;

use clap::{Arg, ArgAction, Command};

pub use commands::handle_subcommands;

pub const DEFAULT_CONFIG_PATH: &str = "rtu_meter.toml";

pub fn build_cli() -> Command {
    Command::new("rtu-meter")
        .version(crate::VERSION)
        .about("Modbus RTU master for half-duplex RS-485 energy meters")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("FILE")
                .help("Configuration file (defaults are used when it does not exist)")
                .default_value(DEFAULT_CONFIG_PATH)
                .global(true),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .short('p')
                .value_name("PORT")
                .help("Serial port, e.g. /dev/ttyUSB0 or COM3")
                .global(true),
        )
        .arg(
            Arg::new("baud")
                .long("baud")
                .short('b')
                .value_name("RATE")
                .help("Baud rate")
                .global(true),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .short('t')
                .value_name("MS")
                .help("Inter-byte response timeout in milliseconds")
                .global(true),
        )
        .arg(
            Arg::new("parity")
                .long("parity")
                .value_name("PARITY")
                .help("none, even or odd")
                .global(true),
        )
        .arg(
            Arg::new("rts")
                .long("rts")
                .help("Drive the RS-485 direction line from RTS")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("simulate")
                .long("simulate")
                .help("Generate meter telemetry instead of opening the serial port")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("read")
                .about("Send one read request and dump the response")
                .arg(Arg::new("slave").long("slave").short('s').default_value("1"))
                .arg(
                    Arg::new("function")
                        .long("function")
                        .short('f')
                        .help("1 coils, 2 discrete inputs, 3 holding, 4 input registers")
                        .default_value("4"),
                )
                .arg(Arg::new("start").long("start").default_value("0"))
                .arg(Arg::new("count").long("count").short('n').default_value("1")),
        )
        .subcommand(Command::new("meter").about("Read the power meter once"))
        .subcommand(Command::new("poll").about("Poll the power meter until Ctrl-C"))
        .subcommand(
            Command::new("crc")
                .about("Compute the Modbus CRC of a hex string")
                .arg(Arg::new("hex").required(true).num_args(1..)),
        )
        .subcommand(Command::new("ports").about("List serial ports"))
        .subcommand(
            Command::new("init-config")
                .about("Write a default configuration file")
                .arg(
                    Arg::new("force")
                        .long("force")
                        .help("Overwrite an existing file")
                        .action(ArgAction::SetTrue),
                ),
        )
}
