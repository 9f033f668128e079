//! Validate a terminal configuration and summarise it

use std::path::Path;

use emv_cless::TerminalConfig;

pub fn cmd_check_config(path: &Path) {
    let config = match TerminalConfig::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return;
        }
    };

    let black_list = match config.build_black_list() {
        Ok(list) => list,
        Err(e) => {
            eprintln!("Invalid black list: {}", e);
            return;
        }
    };

    let ca_keys = match config.load_ca_keys() {
        Ok(keys) => keys,
        Err(e) => {
            eprintln!("Failed to load CA keys: {}", e);
            return;
        }
    };

    println!("Configuration: {}\n", path.display());
    println!("  Merchant language:   {}", config.merchant_language);
    println!("  Supported languages: {}", config.supported_languages.join(", "));
    println!("  Application type:    {:04X}", config.application_type);
    println!("  Service ID:          {:04X}", config.customisation_service_id);
    println!("  Execution:           {:?}", config.execution);
    println!("  Alternate region:    {}", config.alternate_region_mode);
    println!("  Asia GUI:            {}", config.asia_gui_mode);
    println!("  Loop mode:           {}", config.loop_mode);
    println!(
        "  Re-presentment:      {} cycles, {} ms per detection",
        config.presentment.max_cycles, config.presentment.detect_timeout_ms
    );
    println!(
        "  PIN timeouts:        {} ms first key, {} ms between keys",
        config.pin.first_key_timeout_ms, config.pin.inter_key_timeout_ms
    );
    println!("  Black list entries:  {}", black_list.len());

    match &config.ca_keys_file {
        Some(file) => println!("\nCA public keys ({}): {}", file.display(), ca_keys.len()),
        None => println!("\nCA public keys: none configured"),
    }
    for key in ca_keys.iter() {
        println!(
            "  {:<12} RID {} index {:02X}: {} bits",
            key.scheme,
            hex::encode_upper(key.rid),
            key.index,
            key.size() * 8
        );
    }
}
