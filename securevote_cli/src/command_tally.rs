use super::{exit_with, expand, parse_arg, read_json};
use securevote::{combine_all, Ciphertext, KeyCeremony, PublicKey, Share};
use tracing::{debug, info};

pub fn command_tally(matches: &clap::ArgMatches) {
    // Unwraps are OK, all these args are required
    let public_key: PublicKey =
        read_json("securevote tally", matches.value_of("public-key").unwrap());
    let threshold: usize = parse_arg("securevote tally", matches, "threshold").unwrap();
    let shares: Vec<Share> = matches
        .values_of("share")
        .unwrap()
        .map(|filename| read_json("securevote tally", filename))
        .collect();

    let filename = expand(matches.value_of("BALLOTS").unwrap());
    let contents = std::fs::read_to_string(&filename).unwrap_or_else(|e| {
        exit_with(
            "securevote tally",
            format!("unable to read {}: {}", filename, e),
        )
    });

    let mut ballots = Vec::new();
    for (line_number, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let ciphertext = hex::decode(line)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                Ciphertext::from_bytes(&public_key, &bytes).map_err(|e| e.to_string())
            })
            .unwrap_or_else(|e| {
                exit_with(
                    "securevote tally",
                    format!("{} line {}: {}", filename, line_number + 1, e),
                )
            });
        ballots.push(ciphertext);
    }
    debug!(ballots = ballots.len(), "ballots loaded");

    let total = if ballots.is_empty() {
        public_key.encrypt_u64(0)
    } else {
        combine_all(&ballots)
    }
    .unwrap_or_else(|e| exit_with("securevote tally", e));

    let private_key = KeyCeremony::recover_private_key(&public_key, &shares, threshold)
        .unwrap_or_else(|e| exit_with("securevote tally", e));
    let total = private_key
        .decrypt(&total)
        .unwrap_or_else(|e| exit_with("securevote tally", e));

    info!(ballots = ballots.len(), shares = shares.len(), "tally decrypted");
    println!("{}", total);
}
