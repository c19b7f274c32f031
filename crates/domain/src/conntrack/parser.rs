//! Parser for the text event stream printed by `conntrack -E`.
//!
//! ```text
//! [UPDATE] tcp      6 432000 ESTABLISHED src=192.168.43.2 dst=140.112.8.116 sport=62449 dport=443 src=140.112.8.116 dst=100.64.0.1 sport=443 dport=62449 [ASSURED] id=3951546231
//! ```
//!
//! The first `src/dst/sport/dport` group is the original tuple, the second
//! the reply tuple. Only IPv4 TCP/UDP entries are returned; other families
//! and protocols parse to `None`.

use std::net::Ipv4Addr;

use crate::common::entity::L4Protocol;

use super::entity::{
    ConntrackEvent, ConntrackMsgType, FlowTuple, IPS_ASSURED, IPS_CONFIRMED, IPS_SEEN_REPLY,
    IPS_SRC_NAT, IPS_SRC_NAT_DONE,
};
use super::error::ConntrackParseError;

#[derive(Default)]
struct PartialTuple {
    src: Option<Ipv4Addr>,
    dst: Option<Ipv4Addr>,
    src_port: Option<u16>,
    dst_port: Option<u16>,
}

impl PartialTuple {
    fn finish(self) -> Result<FlowTuple, ConntrackParseError> {
        Ok(FlowTuple {
            src: self.src.ok_or(ConntrackParseError::MissingField("src"))?,
            dst: self.dst.ok_or(ConntrackParseError::MissingField("dst"))?,
            src_port: self
                .src_port
                .ok_or(ConntrackParseError::MissingField("sport"))?,
            dst_port: self
                .dst_port
                .ok_or(ConntrackParseError::MissingField("dport"))?,
        })
    }
}

/// Parse one event line. Returns `Ok(None)` for well-formed events that can
/// never be offloaded (IPv6, ICMP and other protocols).
pub fn parse_event_line(line: &str) -> Result<Option<ConntrackEvent>, ConntrackParseError> {
    let mut tokens = line.split_whitespace();

    let mut head = tokens.next().ok_or(ConntrackParseError::Empty)?;
    if is_timestamp(head) {
        head = tokens.next().ok_or(ConntrackParseError::Empty)?;
    }
    let msg_type = match head {
        "[NEW]" | "[UPDATE]" => ConntrackMsgType::New,
        "[DESTROY]" => ConntrackMsgType::Delete,
        other => return Err(ConntrackParseError::UnknownMessage(other.to_string())),
    };

    // Protocol name followed by its number.
    tokens
        .next()
        .ok_or(ConntrackParseError::MissingField("protocol"))?;
    let proto_token = tokens
        .next()
        .ok_or(ConntrackParseError::MissingField("protocol"))?;
    let protocol = L4Protocol::from_u8(parse_field("protocol", proto_token)?);
    if !protocol.is_offloadable() {
        return Ok(None);
    }

    let mut tuples = [PartialTuple::default(), PartialTuple::default()];
    let mut src_seen = 0usize;
    let mut timeout_secs = 0u32;
    let mut unreplied = false;
    let mut assured = false;

    for token in tokens {
        if let Some((key, value)) = token.split_once('=') {
            let slot = src_seen.saturating_sub(1).min(1);
            match key {
                "src" => {
                    if value.contains(':') {
                        return Ok(None);
                    }
                    let slot = src_seen.min(1);
                    tuples[slot].src = Some(parse_field("src", value)?);
                    src_seen += 1;
                }
                "dst" => tuples[slot].dst = Some(parse_field("dst", value)?),
                "sport" => tuples[slot].src_port = Some(parse_field("sport", value)?),
                "dport" => tuples[slot].dst_port = Some(parse_field("dport", value)?),
                _ => {}
            }
        } else {
            match token {
                "[UNREPLIED]" => unreplied = true,
                "[ASSURED]" => assured = true,
                _ => {
                    if src_seen == 0
                        && let Ok(secs) = token.parse::<u32>()
                    {
                        timeout_secs = secs;
                    }
                }
            }
        }
    }

    let [orig, reply] = tuples;
    let tuple_orig = orig.finish()?;
    let tuple_reply = reply.finish()?;

    let mut status = IPS_CONFIRMED;
    if !unreplied {
        status |= IPS_SEEN_REPLY;
    }
    if assured {
        status |= IPS_ASSURED;
    }
    if tuple_orig.src != tuple_reply.dst {
        status |= IPS_SRC_NAT | IPS_SRC_NAT_DONE;
    }

    Ok(Some(ConntrackEvent {
        msg_type,
        protocol,
        tuple_orig,
        tuple_reply,
        status,
        timeout_secs,
    }))
}

fn parse_field<T: std::str::FromStr>(
    field: &'static str,
    value: &str,
) -> Result<T, ConntrackParseError> {
    value
        .parse()
        .map_err(|_| ConntrackParseError::InvalidField {
            field,
            value: value.to_string(),
        })
}

/// `conntrack -o timestamp` prefixes lines with `[seconds.micros]`.
fn is_timestamp(token: &str) -> bool {
    token
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .is_some_and(|t| t.parse::<f64>().is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conntrack::entity::{FlowTransition, IPS_DYING};

    const ESTABLISHED: &str = "[UPDATE] tcp      6 432000 ESTABLISHED src=192.168.43.2 dst=140.112.8.116 sport=62449 dport=443 src=140.112.8.116 dst=100.64.0.1 sport=443 dport=62449 [ASSURED] id=3951546231";

    #[test]
    fn parses_established_update() {
        let event = parse_event_line(ESTABLISHED).unwrap().unwrap();
        assert_eq!(event.msg_type, ConntrackMsgType::New);
        assert_eq!(event.protocol, L4Protocol::Tcp);
        assert_eq!(event.timeout_secs, 432_000);
        assert_eq!(event.tuple_orig.src, Ipv4Addr::new(192, 168, 43, 2));
        assert_eq!(event.tuple_orig.dst_port, 443);
        assert_eq!(event.tuple_reply.dst, Ipv4Addr::new(100, 64, 0, 1));
        assert_eq!(event.tuple_reply.dst_port, 62449);
        assert_eq!(event.status & IPS_DYING, 0);
        assert_eq!(event.transition(), FlowTransition::Establish);
    }

    #[test]
    fn unreplied_new_is_not_established() {
        let line = "    [NEW] udp      17 30 src=192.168.43.2 dst=8.8.8.8 sport=5353 dport=53 [UNREPLIED] src=8.8.8.8 dst=100.64.0.1 sport=53 dport=5353";
        let event = parse_event_line(line).unwrap().unwrap();
        assert_eq!(event.protocol, L4Protocol::Udp);
        assert_eq!(event.status & IPS_SEEN_REPLY, 0);
        assert_eq!(event.transition(), FlowTransition::Ignore);
    }

    #[test]
    fn destroy_without_timeout() {
        let line = "[DESTROY] tcp      6 src=192.168.43.2 dst=140.112.8.116 sport=62449 dport=443 src=140.112.8.116 dst=100.64.0.1 sport=443 dport=62449 [ASSURED]";
        let event = parse_event_line(line).unwrap().unwrap();
        assert_eq!(event.msg_type, ConntrackMsgType::Delete);
        assert_eq!(event.timeout_secs, 0);
        assert_eq!(event.transition(), FlowTransition::Teardown);
    }

    #[test]
    fn timestamp_prefix_is_skipped() {
        let line = format!("[1700000000.123456]\t{ESTABLISHED}");
        assert!(parse_event_line(&line).unwrap().is_some());
    }

    #[test]
    fn non_offloadable_protocols_are_skipped() {
        let icmp = "[NEW] icmp     1 30 src=192.168.43.2 dst=1.1.1.1 type=8 code=0 id=7 [UNREPLIED] src=1.1.1.1 dst=100.64.0.1 type=0 code=0 id=7";
        assert_eq!(parse_event_line(icmp), Ok(None));
        let v6 = "[NEW] tcp      6 120 SYN_SENT src=2001:db8::2 dst=2001:db8::1 sport=1 dport=2 [UNREPLIED] src=2001:db8::1 dst=2001:db8::2 sport=2 dport=1";
        assert_eq!(parse_event_line(v6), Ok(None));
    }

    #[test]
    fn un_natted_flow_lacks_src_nat() {
        let line = "[UPDATE] udp      17 180 src=192.168.43.2 dst=192.168.43.3 sport=1000 dport=2000 src=192.168.43.3 dst=192.168.43.2 sport=2000 dport=1000 [ASSURED]";
        let event = parse_event_line(line).unwrap().unwrap();
        assert_eq!(event.status & IPS_SRC_NAT_DONE, 0);
        assert_eq!(event.transition(), FlowTransition::Ignore);
    }

    #[test]
    fn malformed_lines_are_errors() {
        assert_eq!(parse_event_line("   "), Err(ConntrackParseError::Empty));
        assert!(matches!(
            parse_event_line("[HELLO] tcp 6"),
            Err(ConntrackParseError::UnknownMessage(_))
        ));
        assert!(matches!(
            parse_event_line("[NEW] tcp 6 30 src=192.168.43.2 dst=1.1.1.1 sport=99999 dport=1"),
            Err(ConntrackParseError::InvalidField { field: "sport", .. })
        ));
        assert_eq!(
            parse_event_line("[NEW] tcp 6 30 src=192.168.43.2 dst=1.1.1.1 sport=1 dport=2"),
            Err(ConntrackParseError::MissingField("src"))
        );
    }
}
