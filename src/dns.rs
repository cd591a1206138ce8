//! Minimal DNS wire handling: question-name extraction and forged answers.
//!
//! Only what the datapath needs. Queries are never rewritten; blocked ones
//! get a synthesized response and allowed ones are forwarded untouched.

use crate::config::BlockPolicy;

/// Fixed size of a DNS message header.
pub const DNS_HEADER_LEN: usize = 12;

/// Extract the question name from a raw DNS query payload.
///
/// Walks the label sequence starting right after the header. Returns `None`
/// when the payload is shorter than a header or the labels run past the end
/// of the buffer. Label bytes are kept as-is.
#[must_use]
pub fn extract_domain(payload: &[u8]) -> Option<String> {
    if payload.len() < DNS_HEADER_LEN {
        return None;
    }

    let mut domain = String::new();
    let mut pos = DNS_HEADER_LEN;
    loop {
        let len = usize::from(*payload.get(pos)?);
        if len == 0 {
            break;
        }
        pos += 1;
        if pos + len > payload.len() {
            return None;
        }
        if !domain.is_empty() {
            domain.push('.');
        }
        for &b in &payload[pos..pos + len] {
            domain.push(b as char);
        }
        pos += len;
    }

    if domain.is_empty() {
        None
    } else {
        Some(domain)
    }
}

/// Offset one past the end of the question section (name + QTYPE + QCLASS).
fn question_end(payload: &[u8]) -> Option<usize> {
    let mut pos = DNS_HEADER_LEN;
    loop {
        let len = usize::from(*payload.get(pos)?);
        pos += 1;
        if len == 0 {
            break;
        }
        pos += len;
    }
    let end = pos + 4;
    if end <= payload.len() {
        Some(end)
    } else {
        None
    }
}

/// Synthesize a response for a blocked query.
///
/// The transaction id and question section are copied from the query so the
/// client matches the answer to its request. `Nxdomain` answers with
/// RCODE 3 and no records; `SyntheticAddress` answers with a single
/// `0.0.0.0` A record pointing back at the question name.
///
/// Returns `None` when the question section cannot be located.
#[must_use]
pub fn forge_blocked_response(query: &[u8], policy: BlockPolicy) -> Option<Vec<u8>> {
    let qend = question_end(query)?;

    let mut response = Vec::with_capacity(qend + 16);
    response.extend_from_slice(&query[0..2]); // transaction id

    match policy {
        BlockPolicy::Nxdomain => {
            // QR, AA, RD, RA, RCODE = NXDOMAIN.
            response.extend_from_slice(&[0x85, 0x83]);
            response.extend_from_slice(&query[4..6]); // QDCOUNT
            response.extend_from_slice(&[0, 0, 0, 0, 0, 0]); // AN, NS, AR
            response.extend_from_slice(&query[DNS_HEADER_LEN..qend]);
        }
        BlockPolicy::SyntheticAddress => {
            // QR, AA, RD, RA, NOERROR, one answer.
            response.extend_from_slice(&[0x85, 0x80]);
            response.extend_from_slice(&query[4..6]); // QDCOUNT
            response.extend_from_slice(&[0, 1]); // ANCOUNT
            response.extend_from_slice(&[0, 0, 0, 0]); // NS, AR
            response.extend_from_slice(&query[DNS_HEADER_LEN..qend]);
            // Answer: pointer to the question name, A IN, TTL 300, 0.0.0.0.
            response.extend_from_slice(&[0xC0, 0x0C]);
            response.extend_from_slice(&[0, 1, 0, 1]);
            response.extend_from_slice(&300u32.to_be_bytes());
            response.extend_from_slice(&[0, 4, 0, 0, 0, 0]);
        }
    }

    Some(response)
}
