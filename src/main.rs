// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// CLI entrypoint for gcnforge.

use std::fs;
use std::io;
use std::process::ExitCode;

use clap::Parser;

use gcnforge::assembler::cli::{validate_cli, Cli};
use gcnforge::assembler::Assembler;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match validate_cli(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let content = match fs::read(&cli.input) {
        Ok(content) => content,
        Err(err) => {
            eprintln!("Cannot read '{}': {err}", cli.input.display());
            return ExitCode::FAILURE;
        }
    };

    let mut assembler = Assembler::new(
        &cli.input.display().to_string(),
        content,
        cli.bin_format.to_binary_format(),
        config.device,
        Box::new(io::stderr()),
        Box::new(io::stdout()),
    );
    assembler.set_64bit(cli.bit64);
    assembler.set_warnings(!cli.no_warnings);
    for dir in &cli.include_dirs {
        assembler.add_include_dir(dir);
    }
    for (name, value) in config.defsyms {
        assembler.add_initial_defsym(name, value);
    }

    let good = assembler.assemble();

    if let Some(path) = &cli.output {
        let result = fs::File::create(path)
            .and_then(|mut file| assembler.write_binary(&mut file));
        if let Err(err) = result {
            eprintln!("Cannot write '{}': {err}", path.display());
            return ExitCode::FAILURE;
        }
    }
    if cli.dump_symbols {
        println!("{:#}", assembler.symbols_json());
    }

    if good {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
