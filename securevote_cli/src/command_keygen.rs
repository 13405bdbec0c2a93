use super::{exit_with, expand, parse_arg};
use securevote::{CoreConfig, KeyCeremony};
use std::fs;
use std::path::Path;
use tracing::info;

pub fn command_keygen(matches: &clap::ArgMatches, config: &CoreConfig) {
    let mut config = config.clone();
    if let Some(bits) = parse_arg("securevote keygen", matches, "bits") {
        config.key_bits = bits;
    }
    if let Some(shares) = parse_arg("securevote keygen", matches, "shares") {
        config.trustees = shares;
    }
    if let Some(threshold) = parse_arg("securevote keygen", matches, "threshold") {
        config.threshold = threshold;
    }
    config
        .validate()
        .unwrap_or_else(|e| exit_with("securevote keygen", e));

    // Unwrap is OK, --out is required
    let out = expand(matches.value_of("out").unwrap());
    let out = Path::new(&out);
    fs::create_dir_all(out).unwrap_or_else(|e| {
        exit_with(
            "securevote keygen",
            format!("cannot create directory {}: {}", out.display(), e),
        )
    });

    let (public_key, shares) = KeyCeremony::from_config(&config)
        .run()
        .unwrap_or_else(|e| exit_with("securevote keygen", e));

    write_json(&out.join("public_key.json"), &public_key);
    for share in &shares {
        write_json(&out.join(format!("share_{}.json", share.index)), share);
    }

    info!(dir = %out.display(), shares = shares.len(), "wrote key ceremony output");
    println!("key-id: {}", public_key.id());
    println!("threshold: {} of {}", config.threshold, config.trustees);
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) {
    let json = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| exit_with("securevote keygen", e));
    fs::write(path, json).unwrap_or_else(|e| {
        exit_with(
            "securevote keygen",
            format!("unable to write {}: {}", path.display(), e),
        )
    });
}
