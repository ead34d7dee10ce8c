use anyhow::{Context, Result};
use structopt::StructOpt;

use tsb::cli::TsbOpts;
use tsb::hexfile;
use tsb::protocol::TsbLoader;
use tsb::transport::Transport;

fn main() -> Result<()> {
    tsb::logging::init();

    let opts = TsbOpts::from_args();

    if opts.change_timeout.len() > 2 {
        anyhow::bail!("--change-timeout takes 1 or 2 values");
    }
    if let [ms, f_cpu] = opts.change_timeout.as_slice() {
        let (ms, f_cpu) = (*ms, *f_cpu);
        if !(100..=10_000).contains(&ms) {
            anyhow::bail!("--change-timeout: time delay must be in the range 100..10000 ms");
        }
        if !(1..=25).contains(&f_cpu) && !(10_000..=25_000_000).contains(&f_cpu) {
            anyhow::bail!(
                "--change-timeout: MCU frequency must be 1..25 (MHz) or 10000..25000000 (Hz)"
            );
        }
    }

    let transport = Transport::open(&opts.devicename, opts.baud_rate, opts.reset.to_reset_mode())
        .with_context(|| format!("opening serial port {}", opts.devicename))?;
    let mut loader = TsbLoader::new(transport, opts.password.clone().into_bytes());

    if opts.emergency_erase {
        loader
            .emergency_erase()
            .context("emergency erase failed")?;
    }

    loader.activate().context("activating TinySafeBoot")?;

    if opts.info {
        print_device_info(&loader);
    }

    if opts.new_password.is_some() || !opts.change_timeout.is_empty() {
        change_user_data(&mut loader, &opts)?;
    }

    if let Some(path) = &opts.flash_read {
        let data = loader
            .flash_read(tsb::progress::ignore)
            .context("reading flash")?;
        hexfile::write_file(path, 0, &data).with_context(|| format!("writing {:?}", path))?;
        println!("Flash read into {:?}", path);
    }

    if opts.flash_erase {
        loader.flash_erase(tsb::progress::ignore).context("erasing flash")?;
        println!("Flash erased");
    }

    if let Some(path) = &opts.flash_write {
        let data = hexfile::read_file(path).with_context(|| format!("reading {:?}", path))?;
        loader
            .flash_write(&data, opts.force, tsb::progress::ignore)
            .context("writing flash")?;
        println!("Flash written from {:?}", path);

        if opts.flash_verify {
            verify_flash(&mut loader, &data)?;
        }
    }

    if let Some(path) = &opts.eeprom_read {
        let data = loader
            .eeprom_read(tsb::progress::ignore)
            .context("reading EEPROM")?;
        hexfile::write_file(path, 0, &data).with_context(|| format!("writing {:?}", path))?;
        println!("EEPROM read into {:?}", path);
    }

    if opts.eeprom_erase {
        loader
            .eeprom_erase(tsb::progress::ignore)
            .context("erasing EEPROM")?;
        println!("EEPROM erased");
    }

    if let Some(path) = &opts.eeprom_write {
        let data = hexfile::read_file(path).with_context(|| format!("reading {:?}", path))?;
        loader
            .eeprom_write(&data, tsb::progress::ignore)
            .context("writing EEPROM")?;
        println!("EEPROM written from {:?}", path);

        if opts.eeprom_verify {
            let readback = loader
                .eeprom_read(tsb::progress::ignore)
                .context("reading EEPROM back for verification")?;
            verify_bytes(&data, &readback)?;
            println!("EEPROM verified OK");
        }
    }

    Ok(())
}

fn print_device_info(loader: &TsbLoader) {
    let Some(info) = loader.device_info() else {
        return;
    };
    println!("TINY SAFE BOOTLOADER");
    println!("VERSION   : {}", info.tsbbuild);
    println!("STATUS    : {:#X}", info.tsbstatus);
    println!(
        "SIGNATURE : {:02X} {:02X} {:02X}",
        info.signature.0, info.signature.1, info.signature.2
    );
    if let Some((short, long)) = tsb::signature::lookup(info.signature) {
        println!("DEVICE    : {} ({})", short, long);
    }
    println!("FLASH     : {}", info.flashsize);
    println!("APPFLASH  : {}", info.appflash);
    println!("PAGESIZE  : {}", info.pagesize);
    println!("EEPROM    : {}", info.eepromsize);
    println!("APPJUMP   : {:#06X}", info.appjump);
    println!("TIMEOUT   : {}", info.timeout());
}

fn change_user_data(loader: &mut TsbLoader, opts: &TsbOpts) -> Result<()> {
    let info = loader
        .device_info
        .as_mut()
        .expect("activate() was called above");

    if let Some(password) = &opts.new_password {
        info.set_password(password.clone().into_bytes())?;
    }

    match opts.change_timeout.as_slice() {
        [factor] => info.set_timeout((*factor).clamp(8, 255) as u8)?,
        [ms, f_cpu] => {
            let (ms, f_cpu) = (*ms, *f_cpu);
            let f_cpu_hz = if f_cpu < 100 { f_cpu as u64 * 1_000_000 } else { f_cpu as u64 };
            let factor = ((f_cpu_hz * ms as u64 / 1000) / 196_600).max(1);
            info.set_timeout(factor.min(255) as u8)?;
        }
        _ => {}
    }

    loader.write_user_data().context("writing user data")?;
    println!("Write user data OK");
    println!("Timeout factor {}", loader.device_info().unwrap().timeout());
    Ok(())
}

fn verify_flash(loader: &mut TsbLoader, expected: &[u8]) -> Result<()> {
    let readback = loader
        .flash_read(tsb::progress::ignore)
        .context("reading flash back for verification")?;
    verify_bytes(expected, &readback)?;
    println!("Flash verified OK");
    Ok(())
}

fn verify_bytes(expected: &[u8], actual: &[u8]) -> Result<()> {
    let trimmed_expected = trim_trailing_ff(expected);
    let trimmed_actual = trim_trailing_ff(actual);
    if trimmed_expected != trimmed_actual {
        anyhow::bail!("verification failed: written and read-back data differ");
    }
    Ok(())
}

fn trim_trailing_ff(data: &[u8]) -> &[u8] {
    let end = data.iter().rposition(|&b| b != 0xFF).map_or(0, |i| i + 1);
    &data[..end]
}
