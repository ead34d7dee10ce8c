use anyhow::{Context, Result};
use structopt::StructOpt;

use tsb::catalog::Catalog;
use tsb::cli::FwOpts;
use tsb::firmware::Firmware;

fn main() -> Result<()> {
    tsb::logging::init();

    let opts = FwOpts::from_args();

    let catalog = Catalog::load(&opts.catalog)
        .with_context(|| format!("loading firmware catalog {:?}", opts.catalog))?;

    let (base, info) = catalog.get_firmware(&opts.device).with_context(|| {
        format!(
            "device {:?} is not in the firmware catalog {:?}",
            opts.device, opts.catalog
        )
    })?;

    let mut firmware = Firmware::new(base.to_vec(), info.clone())?;
    firmware.set_rxtx(&opts.rxtx).with_context(|| {
        let supported: Vec<String> = info.port.keys().map(|c| c.to_string()).collect();
        format!(
            "device {:?} does not support pins {:?}; supported ports are: {}",
            opts.device,
            opts.rxtx,
            supported.join(", ")
        )
    })?;

    if opts.output.exists() && !opts.force {
        anyhow::bail!(
            "{:?} already exists; use --force to overwrite",
            opts.output
        );
    }

    let base_addr = info.tsb_start;
    let patched = firmware.to_binary();
    tsb::hexfile::write_file(&opts.output, base_addr, &patched)
        .with_context(|| format!("writing {:?}", opts.output))?;

    println!("TSB firmware saved into the file: {:?}", opts.output);
    Ok(())
}
