//! Blocklist parsing, storage and fetching.
//!
//! Sources come in three syntaxes that get normalized to bare lowercase
//! domains: hosts files (`0.0.0.0 ads.example.com`), Adblock filters
//! (`||ads.example.com^`) and plain domain-per-line lists.

use std::net::Ipv4Addr;

pub mod remote;
pub mod store;

pub use remote::SourceFetcher;
pub use store::HostStore;

/// Hostnames that appear in stock hosts files but never name real services.
const IGNORED_HOSTS: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "local",
    "broadcasthost",
    "ip6-localhost",
    "ip6-loopback",
    "ip6-localnet",
    "ip6-mcastprefix",
    "ip6-allnodes",
    "ip6-allrouters",
    "ip6-allhosts",
];

/// Normalize one list line to a blockable domain, or `None` for lines that
/// carry no domain (comments, exceptions, system hosts entries).
#[must_use]
pub fn parse_line(line: &str) -> Option<String> {
    let line = match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    };
    let line = line.trim();

    if line.is_empty() || line.starts_with('!') || line.starts_with("@@") {
        return None;
    }

    let mut tokens = line.split_whitespace();
    let first = tokens.next()?;

    let candidate = if first.parse::<Ipv4Addr>().is_ok() {
        tokens.next()?
    } else {
        // Adblock and bare-domain entries are single-token lines.
        if tokens.next().is_some() {
            return None;
        }
        clean_adblock(first)
    };

    let candidate = candidate.to_lowercase();

    if !candidate.contains('.') || candidate.parse::<Ipv4Addr>().is_ok() {
        return None;
    }
    if IGNORED_HOSTS.contains(&candidate.as_str()) {
        return None;
    }

    Some(candidate)
}

/// Strip Adblock filter decoration, keeping just the domain part.
fn clean_adblock(token: &str) -> &str {
    let token = token.strip_prefix("||").unwrap_or(token);
    match token.find(['^', '/']) {
        Some(idx) => &token[..idx],
        None => token,
    }
}
