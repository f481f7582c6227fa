// Copyright 2020 Andreas Kurth
//
// SPDX-License-Identifier: (Apache-2.0 OR MIT)

//! Command-Line Interface
//!
//! A thin driver around [`crate::orchestrator::verify`]: parse the layout, its root signing keys
//! and the link directory from argv, run verification, and map ACCEPT/REJECT to a process exit
//! code. See spec's External Interfaces notes: the CLI itself sits outside the core component
//! set, but is still built the way the rest of the crate's ambient stack is (`clap`, `log`).

use crate::error::{Error, Result};
use crate::loader;
use crate::orchestrator;
use clap::{App, Arg};
use log::{debug, info};
use std::path::PathBuf;

pub fn main() -> Result<bool> {
    env_logger::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let name = env!("CARGO_PKG_NAME");
    let version = env!("CARGO_PKG_VERSION");

    let app = App::new(name)
        .version(version)
        .author(env!("CARGO_PKG_AUTHORS"))
        .about("Verifies a software supply chain against a signed in-toto layout.")
        .arg(
            Arg::with_name("layout")
                .help("Path to the signed root layout document.")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("layout_key")
                .long("layout-key")
                .value_name("KEYID")
                .help("A keyid trusted to sign the root layout. May be given more than once.")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .required(true),
        )
        .arg(
            Arg::with_name("link_dir")
                .short("d")
                .long("link-dir")
                .value_name("DIR")
                .help("Directory to discover link (and sublayout) files under.")
                .takes_value(true)
                .default_value("."),
        );

    let matches = app.get_matches();
    debug!("{} v{}", name, version);

    let layout_path = PathBuf::from(matches.value_of("layout").unwrap());
    let verify_keys: Vec<String> = matches
        .values_of("layout_key")
        .unwrap()
        .map(|s| s.to_string())
        .collect();
    let link_dir = PathBuf::from(matches.value_of("link_dir").unwrap());

    debug!("layout: {:?}", layout_path);
    debug!("trusted layout keyids: {:?}", verify_keys);
    debug!("link directory: {:?}", link_dir);

    let metablock = loader::load_layout(&layout_path)
        .map_err(|cause| Error::chain(format!("could not load layout {:?}", layout_path), cause))?;

    match orchestrator::verify(&metablock, &link_dir, &verify_keys, 0) {
        Ok(summary) => {
            info!(
                "ACCEPT: supply chain verified, summary link \"{}\" covers {} material(s) and {} product(s)",
                summary.signed.name,
                summary.signed.materials.len(),
                summary.signed.products.len()
            );
            Ok(true)
        }
        Err(e) => {
            info!("REJECT: {}", e);
            Ok(false)
        }
    }
}
