//! Probe registration and dispatch
//!
//! Probes are named on the command line as `name` or
//! `name:option1=value1,option2=value2`.

use dapflash_core::probe::SwdProbe;

/// Information about a probe backend
pub struct ProbeInfo {
    /// Primary name (used for matching)
    pub name: &'static str,
    /// Alternative names
    pub aliases: &'static [&'static str],
    /// Short description
    pub description: &'static str,
}

/// Get information about all available probes (enabled at compile time)
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_probes() -> Vec<ProbeInfo> {
    let mut probes = Vec::new();

    #[cfg(feature = "dummy")]
    probes.push(ProbeInfo {
        name: "dummy",
        aliases: &["sim"],
        description: "Simulated target (chip=nrf5x|samd21|samx5|stm32, id=, size=, locked=, powered=)",
    });

    probes
}

/// Generate help text listing all available probes
pub fn probe_help() -> String {
    let probes = available_probes();

    if probes.is_empty() {
        return "No probes available (recompile with probe features enabled)".to_string();
    }

    let mut help = String::from("Available probes:\n");
    for p in &probes {
        help.push_str(&format!("  {:12} - {}\n", p.name, p.description));
        if !p.aliases.is_empty() {
            help.push_str(&format!("  {:12}   aliases: {}\n", "", p.aliases.join(", ")));
        }
    }
    help
}

/// Generate a short list of probe names for CLI help
pub fn probe_names_short() -> String {
    let probes = available_probes();
    let names: Vec<&str> = probes.iter().map(|p| p.name).collect();
    names.join(", ")
}

/// Canonical name of the probe called `name`, if it is available
fn find_probe(name: &str) -> Option<&'static str> {
    available_probes()
        .into_iter()
        .find(|p| p.name == name || p.aliases.contains(&name))
        .map(|p| p.name)
}

/// Open the probe described by `probe_str`
#[cfg_attr(not(feature = "dummy"), allow(unused_variables))]
pub fn open_probe(probe_str: &str) -> Result<Box<dyn SwdProbe>, Box<dyn std::error::Error>> {
    let (name, options) = parse_probe_string(probe_str);

    let Some(canonical_name) = find_probe(name) else {
        return Err(unknown_probe_error(name));
    };

    match canonical_name {
        #[cfg(feature = "dummy")]
        "dummy" => {
            let config = dummy_config(&options)?;
            log::info!(
                "Opening simulated {} target (ID 0x{:08X})",
                config.chip,
                config.device_id
            );
            Ok(Box::new(dapflash_dummy::DummySwd::new(config)))
        }

        _ => Err(unknown_probe_error(name)),
    }
}

#[cfg(feature = "dummy")]
fn dummy_config(
    options: &[(&str, &str)],
) -> Result<dapflash_dummy::DummyConfig, Box<dyn std::error::Error>> {
    use dapflash_dummy::{DummyChip, DummyConfig};

    let chip = match options.iter().find(|(k, _)| *k == "chip") {
        Some((_, v)) => v.parse::<DummyChip>()?,
        None => DummyChip::Nrf5x,
    };
    let mut config = DummyConfig::for_chip(chip);

    for (key, value) in options {
        match *key {
            "chip" => {}
            "id" => config.device_id = parse_number(value)?,
            "size" => config.flash_size = parse_number(value)? as usize,
            "locked" => config.locked = parse_bool(value)?,
            "powered" => config.powered = parse_bool(value)?,
            other => log::warn!("dummy: ignoring unknown option '{}'", other),
        }
    }
    Ok(config)
}

#[cfg(feature = "dummy")]
fn parse_number(s: &str) -> Result<u32, Box<dyn std::error::Error>> {
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16)?,
        None => s.parse()?,
    };
    Ok(value)
}

#[cfg(feature = "dummy")]
fn parse_bool(s: &str) -> Result<bool, Box<dyn std::error::Error>> {
    match s {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(format!("invalid boolean '{}'", s).into()),
    }
}

/// Parse a probe string into name and options
///
/// Format: "name" or "name:option1=value1,option2=value2"
pub fn parse_probe_string(s: &str) -> (&str, Vec<(&str, &str)>) {
    if let Some((name, opts)) = s.split_once(':') {
        let options: Vec<_> = opts
            .split(',')
            .filter_map(|opt| opt.split_once('='))
            .collect();
        (name, options)
    } else {
        (s, Vec::new())
    }
}

fn unknown_probe_error(name: &str) -> Box<dyn std::error::Error> {
    let mut msg = format!("Unknown probe: {}\n\n", name);
    msg.push_str(&probe_help());
    msg.push_str("\nUse 'dapflash list-probes' for more details");
    msg.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_probe_string() {
        assert_eq!(parse_probe_string("dummy"), ("dummy", vec![]));
        assert_eq!(
            parse_probe_string("dummy:chip=samd21,locked=true"),
            ("dummy", vec![("chip", "samd21"), ("locked", "true")])
        );
    }

    #[cfg(feature = "dummy")]
    #[test]
    fn test_dummy_options() {
        let config = dummy_config(&[("chip", "samd21"), ("locked", "yes"), ("id", "0x10010300")])
            .unwrap();
        assert_eq!(config.chip, dapflash_dummy::DummyChip::Samd21);
        assert!(config.locked);
        assert_eq!(config.device_id, 0x1001_0300);
        assert!(dummy_config(&[("chip", "esp32")]).is_err());
    }

    #[test]
    fn test_unknown_probe() {
        assert!(open_probe("jlink").is_err());
    }
}
