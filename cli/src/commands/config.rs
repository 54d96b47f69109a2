use color_eyre::eyre::{bail, Result};

use crate::config::{config_path, UserConfig};
use crate::logging;

pub fn run(path: bool, reset: bool, check: bool) -> Result<()> {
    let config_file = config_path();

    if path {
        println!("{}", config_file.display());
        return Ok(());
    }

    if reset {
        let config = UserConfig::default();
        config.save()?;
        println!("Config reset to defaults at: {}", config_file.display());
        return Ok(());
    }

    let config = if config_file.exists() {
        UserConfig::load_from(&config_file)?
    } else {
        UserConfig::default()
    };

    if check {
        let problems = config.validate();
        if problems.is_empty() {
            println!(
                "OK: {} power, {} tankage item(s), {} group(s)",
                config.power.len(),
                config.tankage.len(),
                config.groups.len()
            );
            return Ok(());
        }
        for problem in &problems {
            println!("- {}", problem);
        }
        bail!("{} configuration problem(s)", problems.len());
    }

    println!("Config file: {}", config_file.display());
    println!("Log directory: {}", logging::log_dir().display());
    println!();
    println!("{}", toml::to_string_pretty(&config)?);

    Ok(())
}
