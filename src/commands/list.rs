//! List commands implementation

use dapflash_core::Family;

use crate::probes;

/// List all available probes
pub fn list_probes() {
    print!("{}", probes::probe_help());
}

/// List the devices known to each family
pub fn list_devices(family_filter: Option<Family>) {
    println!("Supported devices:");
    println!();
    println!("{:<8} {:<40} {:>10} {:>10}", "Family", "Name", "Flash", "ID");
    println!("{}", "-".repeat(71));

    for family in Family::ALL {
        if family_filter.is_some_and(|f| f != family) {
            continue;
        }
        for device in family.devices() {
            let size_str = if device.flash_size == 0 {
                "from chip".to_string()
            } else {
                format_size(device.flash_size)
            };
            println!(
                "{:<8} {:<40} {:>10} {:>10}",
                family.name(),
                device.name,
                size_str,
                format!("0x{:08X}", device.id)
            );
        }
    }
}

fn format_size(bytes: u32) -> String {
    if bytes >= 1024 * 1024 {
        format!("{} MiB", bytes / (1024 * 1024))
    } else if bytes >= 1024 {
        format!("{} KiB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(256 * 1024), "256 KiB");
        assert_eq!(format_size(1024 * 1024), "1 MiB");
    }
}
