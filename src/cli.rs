//! Command-line surface.

use crate::monitor::{DEFAULT_PORTSPEC, PortSpec};
use crate::notes::NoteTable;
use clap::Parser;
use clap::error::ErrorKind;
use log::LevelFilter;

pub const DEFAULT_CHIP: &str = "gpiochip0";

/// Offsets on `DEFAULT_CHIP` driven by note table lines 0, 1 and 2.
pub const DEFAULT_LINES: [u32; 3] = [25, 26, 27];

/// Watch specified MIDI client and translate Note-On/Off to GPIO On/Off
#[derive(Parser, Debug)]
#[command(name = "midi2gpio")]
pub struct Args {
    /// Log relevant MIDI messages
    #[arg(short, long)]
    pub verbose: bool,

    /// Watch specified MIDI client and port
    #[arg(
        short,
        long,
        value_name = "client:port",
        default_value = DEFAULT_PORTSPEC,
        alias = "port"
    )]
    pub portspec: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub portspec: PortSpec,
    pub verbose: bool,
    pub chip: String,
    pub lines: Vec<u32>,
    pub notes: NoteTable,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            portspec: PortSpec::new(args.portspec),
            verbose: args.verbose,
            chip: DEFAULT_CHIP.to_owned(),
            lines: DEFAULT_LINES.to_vec(),
            notes: NoteTable::default(),
        }
    }
}

impl Config {
    pub fn log_level(&self) -> LevelFilter {
        if self.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    }
}

/// Help is a successful exit; every other parse error is a bad invocation.
pub fn exit_status(err: &clap::Error) -> u8 {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}
