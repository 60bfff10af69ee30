//! IP-ID behavior tracking (RFC 3095 §4.5.5, RFC 5225 §6.3.3).
//!
//! Sequential IPv4 identifiers are transmitted as a W-LSB-encoded offset
//! from the sequence number; byte-swapped sequential identifiers (hosts
//! filling the field in little-endian order) are normalized first; random
//! identifiers ride uncompressed; zero identifiers are elided entirely.

use rohc_pdu::packet::IpIdBehavior;

/// Largest jump between consecutive identifiers still considered
/// sequential.
pub const MAX_SEQUENTIAL_DELTA: u16 = 20;

/// Swaps the two bytes of an identifier (sequential-swapped behavior).
#[must_use]
pub const fn swap16(value: u16) -> u16 {
    value.rotate_left(8)
}

/// Classifies the behavior of an IPv4 identifier from two consecutive
/// observations.
#[must_use]
pub fn classify_ip_id(previous: u16, current: u16) -> IpIdBehavior {
    if previous == 0 && current == 0 {
        return IpIdBehavior::Zero;
    }

    let delta = current.wrapping_sub(previous);
    if delta > 0 && delta <= MAX_SEQUENTIAL_DELTA {
        return IpIdBehavior::Sequential;
    }

    let swapped_delta = swap16(current).wrapping_sub(swap16(previous));
    if swapped_delta > 0 && swapped_delta <= MAX_SEQUENTIAL_DELTA {
        return IpIdBehavior::SequentialSwapped;
    }

    IpIdBehavior::Random
}

/// The identifier in the byte order the offset scheme works in.
#[must_use]
pub const fn normalize_ip_id(behavior: IpIdBehavior, id: u16) -> u16 {
    match behavior {
        IpIdBehavior::SequentialSwapped => swap16(id),
        _ => id,
    }
}

/// Offset of a (normalized) identifier from the sequence number.
#[must_use]
pub const fn ip_id_offset(id: u16, sn: u16) -> u16 {
    id.wrapping_sub(sn)
}

/// Rebuilds the wire identifier from a decoded offset.
#[must_use]
pub const fn ip_id_from_offset(behavior: IpIdBehavior, offset: u16, sn: u16) -> u16 {
    let id = offset.wrapping_add(sn);
    match behavior {
        IpIdBehavior::SequentialSwapped => swap16(id),
        _ => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_detection() {
        assert_eq!(classify_ip_id(100, 101), IpIdBehavior::Sequential);
        assert_eq!(classify_ip_id(100, 120), IpIdBehavior::Sequential);
        assert_eq!(classify_ip_id(0xffff, 3), IpIdBehavior::Sequential);
        assert_eq!(classify_ip_id(100, 121), IpIdBehavior::Random);
        assert_eq!(classify_ip_id(100, 100), IpIdBehavior::Random);
        assert_eq!(classify_ip_id(100, 90), IpIdBehavior::Random);
    }

    #[test]
    fn swapped_detection() {
        let previous = swap16(500);
        let current = swap16(501);
        assert_eq!(classify_ip_id(previous, current), IpIdBehavior::SequentialSwapped);
    }

    #[test]
    fn zero_detection() {
        assert_eq!(classify_ip_id(0, 0), IpIdBehavior::Zero);
        assert_eq!(classify_ip_id(0, 1), IpIdBehavior::Sequential);
    }

    #[test]
    fn offset_round_trip() {
        for (behavior, id, sn) in [
            (IpIdBehavior::Sequential, 5000u16, 4990u16),
            (IpIdBehavior::SequentialSwapped, swap16(5000), 4990),
            (IpIdBehavior::Sequential, 3, 0xfffe),
        ] {
            let normalized = normalize_ip_id(behavior, id);
            let offset = ip_id_offset(normalized, sn);
            assert_eq!(ip_id_from_offset(behavior, offset, sn), id);
        }
    }
}
