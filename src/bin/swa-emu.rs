// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Minimal launcher so the library can run as a stand-alone emulator.
//!
//!  Build it with `cargo build --release --bin swa-emu`
//!  The binary honours SWA_CONFIG_FILE and always layers `SWA__` variables on top.

use std::env;
use std::error::Error;
use swa_emu::{Emulator, error_fmt, info_fmt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    println!("Starting swa-emu");

    let mut loader = Emulator::loader().with_env_vars();
    match env::var("SWA_CONFIG_FILE") {
        Ok(path) => {
            println!("Using configuration from {path}");
            loader = loader.with_config_file(&path);
        }
        Err(_) => println!("No SWA_CONFIG_FILE set; using defaults and SWA__ variables"),
    }

    let emulator = match loader.build().await {
        Ok(emulator) => emulator,
        Err(e) => {
            println!("Failed to build emulator: {e}");
            return Err(e.into());
        }
    };

    match emulator.start().await {
        Ok(()) => info_fmt!("Startup", "Emulator stopped gracefully"),
        Err(e) => {
            error_fmt!("Startup", "Emulator failed: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
