//! Chain detection command line.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use jtagscan::cable::{self, CableConfig, CableKind, CableSubtype, OpenError};
use jtagscan::chain::JtagChain;
use jtagscan::detect::{self, DetectError};
use jtagscan::devicedb::{DbError, DeviceDb};

const DEFAULT_IDS_HELP: &str = "\
Default USB ids per cable:
  ftdi              0403:6010
  ftdi -t olimex    15ba:0003
  ftdi -t amontec   0403:cff8
  fx2               fffe:0002
  xpc               03fd:0008";

/// Detect and identify the devices on a JTAG boundary-scan chain.
#[derive(Debug, Parser)]
#[command(name = "jtagscan", about, after_help = DEFAULT_IDS_HELP)]
struct Args {
    /// Cable type: pp, ftdi, fx2 or xpc
    #[arg(short, long, default_value = "pp")]
    cable: CableKind,

    /// Parallel port device path [default: /dev/parport0]
    #[arg(short, long)]
    device: Option<String>,

    /// USB vendor id, hex
    #[arg(short = 'V', long, value_parser = parse_usb_id)]
    vendor: Option<u16>,

    /// USB product id, hex
    #[arg(short = 'P', long, value_parser = parse_usb_id)]
    product: Option<u16>,

    /// Match only cables with this USB product string
    #[arg(short = 'D', long)]
    description: Option<String>,

    /// Match only cables with this USB serial number
    #[arg(short = 'S', long)]
    serial: Option<String>,

    /// Cable subtype: ikda, olimex or amontec (ftdi), int (xpc)
    #[arg(short = 't', long)]
    subtype: Option<CableSubtype>,

    /// Device list file, overriding JTAGSCAN_DEVICEDB and the built-in list
    #[arg(long, value_name = "PATH")]
    devicedb: Option<PathBuf>,

    /// Chatty output: cable tracing plus the active device list source
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error(transparent)]
    Open(#[from] OpenError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Detect(#[from] DetectError),
}

impl RunError {
    fn exit_code(&self) -> ExitCode {
        match self {
            // a subtype/kind mismatch is a usage problem, same exit code
            // as any other bad command line
            RunError::Open(OpenError::BadSubtype { .. }) => ExitCode::from(2),
            _ => ExitCode::FAILURE,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp(None)
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            err.exit_code()
        }
    }
}

fn run(args: &Args) -> Result<(), RunError> {
    let config = CableConfig {
        kind: args.cable,
        device: args.device.clone(),
        vendor: args.vendor,
        product: args.product,
        description: args.description.clone(),
        serial: args.serial.clone(),
        subtype: args.subtype,
        verbose: args.verbose,
    };
    let mut cable = cable::open_cable(&config)?;
    let db = DeviceDb::load(args.devicedb.as_deref())?;

    let mut chain = JtagChain::scan(cable.as_mut()).map_err(DetectError::from)?;
    let stdout = io::stdout();
    detect::detect_chain(&mut chain, &db, &mut stdout.lock())?;
    Ok(())
}

fn report(err: &RunError) {
    eprintln!("error: {err}");
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        eprintln!("  caused by: {cause}");
        source = cause.source();
    }
    if matches!(err, RunError::Open(OpenError::BadSubtype { .. })) {
        eprintln!("run with --help to see which subtypes fit which cable");
    }
}

fn parse_usb_id(s: &str) -> Result<u16, String> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u16::from_str_radix(digits, 16).map_err(|err| format!("'{s}' is not a hex USB id: {err}"))
}
