use super::{exit_with, read_json};
use securevote::PublicKey;

pub fn command_encrypt(matches: &clap::ArgMatches) {
    // Unwraps are OK, both these args are required
    let public_key: PublicKey =
        read_json("securevote encrypt", matches.value_of("public-key").unwrap());
    let value = matches.value_of("VALUE").unwrap();

    let value: u64 = value.parse().unwrap_or_else(|_| {
        exit_with(
            "securevote encrypt",
            format!("{} is not a non-negative integer", value),
        )
    });

    let bytes = public_key
        .encrypt_u64(value)
        .and_then(|ciphertext| ciphertext.to_bytes())
        .unwrap_or_else(|e| exit_with("securevote encrypt", e));

    println!("{}", hex::encode(bytes));
}
