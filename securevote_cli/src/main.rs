use clap::{App, AppSettings, Arg, SubCommand};
use num_enum::TryFromPrimitive;
use securevote::CoreConfig;
use std::path::Path;
use tracing_subscriber::EnvFilter;

mod command_encrypt;
mod command_keygen;
mod command_tally;
mod command_verify_chain;

use command_encrypt::command_encrypt;
use command_keygen::command_keygen;
use command_tally::command_tally;
use command_verify_chain::command_verify_chain;

#[derive(TryFromPrimitive, PartialEq, Copy, Clone, Debug)]
#[repr(u8)]
pub enum Verbosity {
    Warn = 0,
    Info = 1,
    Debug = 2,
}

impl Verbosity {
    fn directive(self) -> &'static str {
        match self {
            Verbosity::Warn => "warn",
            Verbosity::Info => "securevote=info,securevote_cli=info,warn",
            Verbosity::Debug => "securevote=debug,securevote_cli=debug,info",
        }
    }
}

fn main() {
    let matches = App::new("SecureVote CLI")
        .version("0.1")
        .about("Key ceremony, ballot encryption, tallying and audit verification")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .global(true)
                .help("Sets the level of verbosity"),
        )
        .arg(
            Arg::with_name("config")
                .long("config")
                .takes_value(true)
                .global(true)
                .help("YAML config file, overridden by SECUREVOTE_* environment variables"),
        )
        .subcommand(
            SubCommand::with_name("keygen")
                .about("Run the key ceremony and write the public key and trustee shares")
                .arg(
                    Arg::with_name("out")
                        .long("out")
                        .takes_value(true)
                        .required(true)
                        .help("Directory to write public_key.json and share_<i>.json into"),
                )
                .arg(
                    Arg::with_name("bits")
                        .long("bits")
                        .takes_value(true)
                        .help("Modulus size in bits"),
                )
                .arg(
                    Arg::with_name("shares")
                        .long("shares")
                        .takes_value(true)
                        .help("Number of trustees"),
                )
                .arg(
                    Arg::with_name("threshold")
                        .long("threshold")
                        .takes_value(true)
                        .help("Shares needed to decrypt"),
                ),
        )
        .subcommand(
            SubCommand::with_name("encrypt")
                .about("Encrypt a value and print the ciphertext as hex")
                .arg(
                    Arg::with_name("public-key")
                        .long("public-key")
                        .takes_value(true)
                        .required(true)
                        .help("Public key JSON file"),
                )
                .arg(
                    Arg::with_name("VALUE")
                        .index(1)
                        .required(true)
                        .help("Non-negative integer to encrypt"),
                ),
        )
        .subcommand(
            SubCommand::with_name("tally")
                .about("Sum hex ciphertexts and decrypt the total with trustee shares")
                .arg(
                    Arg::with_name("public-key")
                        .long("public-key")
                        .takes_value(true)
                        .required(true)
                        .help("Public key JSON file"),
                )
                .arg(
                    Arg::with_name("threshold")
                        .long("threshold")
                        .takes_value(true)
                        .required(true)
                        .help("Shares needed to decrypt"),
                )
                .arg(
                    Arg::with_name("share")
                        .long("share")
                        .takes_value(true)
                        .multiple(true)
                        .number_of_values(1)
                        .required(true)
                        .help("Trustee share JSON file, repeat for each share"),
                )
                .arg(
                    Arg::with_name("BALLOTS")
                        .index(1)
                        .required(true)
                        .help("File with one hex ciphertext per line"),
                ),
        )
        .subcommand(
            SubCommand::with_name("verify-chain")
                .about("Verify an exported audit chain")
                .arg(
                    Arg::with_name("INPUT")
                        .index(1)
                        .required(true)
                        .help("JSON array of audit entries"),
                ),
        )
        .get_matches();

    let verbosity = Verbosity::try_from_primitive(matches.occurrences_of("v").min(2) as u8)
        .unwrap_or(Verbosity::Debug);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config_path = matches.value_of("config").map(expand);
    let config = CoreConfig::load(config_path.as_deref().map(Path::new))
        .unwrap_or_else(|e| exit_with("securevote", e));

    // Subcommands
    match matches.subcommand() {
        ("keygen", Some(matches)) => command_keygen(matches, &config),
        ("encrypt", Some(matches)) => command_encrypt(matches),
        ("tally", Some(matches)) => command_tally(matches),
        ("verify-chain", Some(matches)) => command_verify_chain(matches),
        _ => unreachable!("clap requires a subcommand"),
    }
}

pub fn expand(filename: &str) -> String {
    shellexpand::tilde(filename).into_owned()
}

/// Print an error for `command` and exit with status 1.
pub fn exit_with(command: &str, error: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", command, error);
    std::process::exit(1);
}

/// Read and parse a JSON file, exiting on failure.
pub fn read_json<T: serde::de::DeserializeOwned>(command: &str, filename: &str) -> T {
    let filename = expand(filename);
    let bytes = std::fs::read(&filename)
        .unwrap_or_else(|e| exit_with(command, format!("unable to read {}: {}", filename, e)));
    serde_json::from_slice(&bytes)
        .unwrap_or_else(|e| exit_with(command, format!("unable to parse {}: {}", filename, e)))
}

/// Parse a numeric argument, exiting on failure.
pub fn parse_arg<T: std::str::FromStr>(command: &str, matches: &clap::ArgMatches, name: &str) -> Option<T> {
    matches.value_of(name).map(|value| {
        value
            .parse()
            .unwrap_or_else(|_| exit_with(command, format!("invalid value for --{}: {}", name, value)))
    })
}
