use super::read_json;
use securevote::{AuditChain, AuditEntry, ChainStatus, MemAuditStore};

pub fn command_verify_chain(matches: &clap::ArgMatches) {
    // Unwrap is OK, INPUT is required
    let entries: Vec<AuditEntry> =
        read_json("securevote verify-chain", matches.value_of("INPUT").unwrap());

    let chain = AuditChain::new(MemAuditStore::from(entries));
    let status = chain.verify();

    match serde_json::to_string_pretty(&status) {
        Ok(json) => println!("{}", json),
        Err(_) => println!("{}", status),
    }

    // Tampering needs a human: signal it through the exit code
    if let ChainStatus::CompromisedAt { .. } = status {
        std::process::exit(2);
    }
}
