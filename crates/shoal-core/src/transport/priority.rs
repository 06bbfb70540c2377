//! Address ordering

use crate::types::PeerAddress;

/// Order candidate addresses so every stream-capable address comes first.
///
/// Stable partition: the relative order within the stream and the non-stream
/// class is the input order. Addresses with an unknown scheme count as
/// non-stream.
pub fn prioritize(addresses: &[PeerAddress]) -> Vec<PeerAddress> {
    let (mut ordered, rest): (Vec<PeerAddress>, Vec<PeerAddress>) =
        addresses.iter().cloned().partition(PeerAddress::is_stream);
    ordered.extend(rest);
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs(list: &[&str]) -> Vec<PeerAddress> {
        list.iter().map(|a| PeerAddress::from(*a)).collect()
    }

    #[test]
    fn test_stream_before_mail() {
        assert_eq!(
            prioritize(&addrs(&["mail://bob", "tcp://bob:7070"])),
            addrs(&["tcp://bob:7070", "mail://bob"])
        );
    }

    #[test]
    fn test_order_within_class_preserved() {
        assert_eq!(
            prioritize(&addrs(&[
                "udp://a",
                "http://b",
                "mailto:c",
                "bt://d",
                "tcp://e",
            ])),
            addrs(&["http://b", "bt://d", "tcp://e", "udp://a", "mailto:c"])
        );
    }

    #[test]
    fn test_unknown_scheme_is_non_stream() {
        assert_eq!(
            prioritize(&addrs(&["gopher://x", "tcp://y", "no-scheme"])),
            addrs(&["tcp://y", "gopher://x", "no-scheme"])
        );
    }

    #[test]
    fn test_empty() {
        assert!(prioritize(&[]).is_empty());
    }
}
