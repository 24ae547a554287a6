// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Command-line interface parsing and argument validation.

use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};

use crate::core::error::{AsmError, AsmErrorKind};
use crate::core::literal;

use super::{BinaryFormat, GpuDeviceType};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const LONG_ABOUT: &str = "Assembler for AMD GCN GPUs.

Assembles a single source file into a raw code dump, an AMD Catalyst
section set or a GalliumCompute section set. Include directories are
searched in the order given. Initial symbols installed with -D are
reported against a <command-line> origin when invalid.";

#[derive(Parser, Debug)]
#[command(
    name = "gcnforge",
    version = VERSION,
    about = "Assembler for AMD GCN GPUs (raw, AMD Catalyst and GalliumCompute outputs)",
    long_about = LONG_ABOUT
)]
pub struct Cli {
    #[arg(value_name = "FILE", help = "Input assembly source file")]
    pub input: PathBuf,
    #[arg(
        short = 'I',
        long = "include-dir",
        value_name = "DIR",
        action = ArgAction::Append,
        long_help = "Add a directory to the include search path (repeatable)."
    )]
    pub include_dirs: Vec<PathBuf>,
    #[arg(
        short = 'D',
        long = "defsym",
        value_name = "NAME[=VALUE]",
        action = ArgAction::Append,
        long_help = "Define an initial symbol before the first source line. VALUE is a \
                     numeric literal and defaults to 0."
    )]
    pub defsyms: Vec<String>,
    #[arg(
        short = 'g',
        long = "gpu",
        value_name = "DEVICE",
        default_value = "CapeVerde",
        long_help = "Target GPU device type (CapeVerde, Pitcairn, Tahiti, Oland, Bonaire, \
                     Spectre, Spooky, Kalindi, Hainan, Hawaii)."
    )]
    pub gpu: String,
    #[arg(
        short = 'b',
        long = "bin-format",
        value_enum,
        default_value_t = OutputFormat::Amd,
        long_help = "Output container format."
    )]
    pub bin_format: OutputFormat,
    #[arg(
        long = "64bit",
        action = ArgAction::SetTrue,
        long_help = "Assemble for 64-bit addressing mode."
    )]
    pub bit64: bool,
    #[arg(
        short = 'w',
        long = "no-warnings",
        action = ArgAction::SetTrue,
        long_help = "Suppress warning diagnostics."
    )]
    pub no_warnings: bool,
    #[arg(
        short = 'o',
        long = "output",
        value_name = "FILE",
        long_help = "Write the output binary to FILE."
    )]
    pub output: Option<PathBuf>,
    #[arg(
        long = "dump-symbols",
        action = ArgAction::SetTrue,
        long_help = "Print the final symbol table as JSON to stdout."
    )]
    pub dump_symbols: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Raw,
    Amd,
    Gallium,
}

impl OutputFormat {
    pub fn to_binary_format(self) -> BinaryFormat {
        match self {
            OutputFormat::Raw => BinaryFormat::RawCode,
            OutputFormat::Amd => BinaryFormat::Amd,
            OutputFormat::Gallium => BinaryFormat::Gallium,
        }
    }
}

/// Validated CLI configuration.
pub struct CliConfig {
    pub device: GpuDeviceType,
    pub defsyms: Vec<(String, u64)>,
}

pub fn validate_cli(cli: &Cli) -> Result<CliConfig, AsmError> {
    let device = GpuDeviceType::from_name(&cli.gpu).ok_or_else(|| {
        AsmError::with_param(AsmErrorKind::Cli, "Unknown GPU device type", &cli.gpu)
    })?;
    let mut defsyms = Vec::new();
    for def in &cli.defsyms {
        let (name, value) = match def.split_once('=') {
            Some((name, value_text)) => {
                let bytes = value_text.as_bytes();
                let mut pos = 0;
                let value = literal::parse_literal(bytes, &mut pos)
                    .ok()
                    .filter(|_| pos == bytes.len())
                    .ok_or_else(|| {
                        AsmError::with_param(AsmErrorKind::Cli, "Invalid initial symbol value", def)
                    })?;
                (name, value)
            }
            None => (def.as_str(), 0),
        };
        if name.is_empty() {
            return Err(AsmError::with_param(
                AsmErrorKind::Cli,
                "Invalid initial symbol",
                def,
            ));
        }
        defsyms.push((name.to_string(), value));
    }
    Ok(CliConfig { device, defsyms })
}
