//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse a string as a hex or decimal u8
fn parse_hex_u8(s: &str) -> Result<u8, String> {
    let value = parse_hex_u32(s)?;
    u8::try_from(value).map_err(|_| format!("Value out of range: {}", s))
}

/// Bytes given as a hex string, e.g. `deadbeef`
#[derive(Debug, Clone)]
pub struct HexBytes(pub Vec<u8>);

fn parse_hex_bytes(s: &str) -> Result<HexBytes, String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() || s.len() % 2 != 0 {
        return Err("Expected an even number of hex digits".into());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            s.get(i..i + 2)
                .ok_or_else(|| "Invalid hex string".to_string())
                .and_then(|pair| {
                    u8::from_str_radix(pair, 16).map_err(|e| format!("Invalid hex byte: {}", e))
                })
        })
        .collect::<Result<Vec<u8>, String>>()
        .map(HexBytes)
}

#[derive(Parser)]
#[command(name = "qflash")]
#[command(author, version, about = "Quad SPI NOR flash simulator and programmer", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (TOML format)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Memory image backing the simulated flash
    /// Loaded before the command runs and saved after commands that modify it;
    /// OTP and sector locks are kept in `<image>.state.toml`
    #[arg(long, global = true)]
    pub image: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show identification and register contents
    Id,

    /// Read flash contents to file
    Read {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Start address (hex with 0x prefix or decimal)
        #[arg(long, value_parser = parse_hex_u32, default_value = "0")]
        start: u32,

        /// Number of bytes to read (defaults to the rest of the flash)
        #[arg(long, value_parser = parse_hex_u32)]
        length: Option<u32>,
    },

    /// Write file contents to flash, erasing only where needed
    Write {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        /// Start address (hex with 0x prefix or decimal)
        #[arg(long, value_parser = parse_hex_u32, default_value = "0")]
        start: u32,

        /// Skip readback verification
        #[arg(long)]
        no_verify: bool,

        /// Do not restore data outside the written range in erased sectors
        #[arg(long)]
        no_preserve: bool,
    },

    /// Erase flash (whole chip unless a range is given)
    Erase {
        /// Start address (hex with 0x prefix or decimal)
        #[arg(long, value_parser = parse_hex_u32, requires = "length")]
        start: Option<u32>,

        /// Number of bytes to erase
        #[arg(long, value_parser = parse_hex_u32, requires = "start")]
        length: Option<u32>,

        /// Erase in 4 KiB subsectors instead of 64 KiB sectors
        #[arg(long)]
        subsector: bool,
    },

    /// Verify flash contents against file
    Verify {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        /// Start address (hex with 0x prefix or decimal)
        #[arg(long, value_parser = parse_hex_u32, default_value = "0")]
        start: u32,
    },

    /// Show or change a sector lock register
    Lock {
        /// Sector index (0-255)
        #[arg(long)]
        sector: usize,

        /// New lock bits (bit 0: locked, bit 1: lock-down)
        #[arg(long, value_parser = parse_hex_u8)]
        set: Option<u8>,
    },

    /// One-time programmable area operations
    #[command(subcommand)]
    Otp(OtpCommands),
}

#[derive(Subcommand)]
pub enum OtpCommands {
    /// Dump the OTP array and its lock state
    Read,

    /// Program bytes into the OTP array
    Program {
        /// Offset into the OTP array
        #[arg(long, value_parser = parse_hex_u32, default_value = "0")]
        offset: u32,

        /// Data as a hex string
        #[arg(long, value_parser = parse_hex_bytes)]
        data: HexBytes,
    },

    /// Permanently write protect the OTP array
    Lock,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn hex_numbers() {
        assert_eq!(parse_hex_u32("0x1000"), Ok(0x1000));
        assert_eq!(parse_hex_u32("4096"), Ok(4096));
        assert!(parse_hex_u32("0xZZ").is_err());
        assert_eq!(parse_hex_u8("0x03"), Ok(3));
        assert!(parse_hex_u8("0x100").is_err());
    }

    #[test]
    fn hex_strings() {
        assert_eq!(parse_hex_bytes("deadBEEF").map(|b| b.0), Ok(vec![0xDE, 0xAD, 0xBE, 0xEF]));
        assert_eq!(parse_hex_bytes("0x00").map(|b| b.0), Ok(vec![0]));
        assert!(parse_hex_bytes("abc").is_err());
        assert!(parse_hex_bytes("").is_err());
        assert!(parse_hex_bytes("zz").is_err());
    }

    #[test]
    fn command_line() {
        Cli::command().debug_assert();

        let cli = Cli::try_parse_from([
            "qflash", "-vv", "--image", "flash.bin", "write", "-i", "fw.bin", "--start", "0x10000",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Write { start, no_verify, .. } => {
                assert_eq!(start, 0x10000);
                assert!(!no_verify);
            }
            _ => panic!("expected write"),
        }

        assert!(Cli::try_parse_from(["qflash", "erase", "--start", "0"]).is_err());
    }
}
