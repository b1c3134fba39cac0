// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use super::{
    fragment,
    Ipv4Header,
    Reassembly,
    ReassemblyKey,
    IPOPT_LSRR,
    IPOPT_RR,
    IPV4_HEADER_MIN_SIZE,
};
use crate::{
    inetstack::{
        conduit::messenger::{
            fold_checksum,
            sum_words,
        },
        protocols::ip::IpProtocol,
    },
    runtime::network::consts::DEFAULT_MTU,
};
use ::anyhow::Result;
use ::std::net::Ipv4Addr;

//======================================================================================================================
// Helper Functions
//======================================================================================================================

fn udp_header(id: u16) -> Ipv4Header {
    let mut header: Ipv4Header =
        Ipv4Header::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), IpProtocol::UDP as u8, 64);
    header.set_identification(id);
    header
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

/// Fragments a payload of `len` bytes and feeds the fragments to a reassembly in the given order.
fn round_trip(len: usize, mtu: usize, reverse: bool) -> Result<()> {
    let header: Ipv4Header = udp_header(len as u16);
    let data: Vec<u8> = payload(len);
    let mut fragments: Vec<Vec<u8>> = fragment(&header, &data, mtu)?;
    let expected: usize = if IPV4_HEADER_MIN_SIZE + len <= mtu {
        1
    } else {
        (len + ((mtu - IPV4_HEADER_MIN_SIZE) & !7) - 1) / ((mtu - IPV4_HEADER_MIN_SIZE) & !7)
    };
    crate::ensure_eq!(fragments.len(), expected);
    for f in &fragments {
        crate::ensure_eq!(f.len() <= mtu, true);
    }
    if reverse {
        fragments.reverse();
    }

    let mut reassembly: Reassembly = Reassembly::new(2);
    let mut whole: Option<Vec<u8>> = None;
    for f in &fragments {
        let h: Ipv4Header = Ipv4Header::parse(f)?;
        crate::ensure_eq!(ReassemblyKey::of(&h), ReassemblyKey::of(&header));
        if !h.is_fragment() {
            whole = Some(f.clone());
            break;
        }
        crate::ensure_eq!(whole.is_none(), true);
        whole = reassembly.insert(&h, &f[h.compute_size()..h.get_total_length()], f);
    }
    let whole: Vec<u8> = match whole {
        Some(whole) => whole,
        None => anyhow::bail!("datagram of {} bytes was not reassembled", len),
    };
    let h: Ipv4Header = Ipv4Header::parse(&whole)?;
    crate::ensure_eq!(h.is_fragment(), false);
    crate::ensure_eq!(h.get_total_length(), IPV4_HEADER_MIN_SIZE + len);
    crate::ensure_eq!(&whole[IPV4_HEADER_MIN_SIZE..], &data[..]);
    Ok(())
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[test]
fn checksum_verifies_to_zero() -> Result<()> {
    let mut header: Ipv4Header = udp_header(0x1234);
    header.set_total_length(IPV4_HEADER_MIN_SIZE + 8);
    let mut bytes: [u8; IPV4_HEADER_MIN_SIZE] = [0; IPV4_HEADER_MIN_SIZE];
    header.serialize(&mut bytes);
    crate::ensure_eq!(fold_checksum(sum_words(&bytes, 0)), 0);

    // A flipped bit is caught.
    bytes[8] ^= 1;
    crate::ensure_eq!(fold_checksum(sum_words(&bytes, 0)) == 0, false);
    Ok(())
}

#[test]
fn parse_rejects_bad_headers() -> Result<()> {
    let mut header: Ipv4Header = udp_header(1);
    header.set_total_length(IPV4_HEADER_MIN_SIZE);
    let mut bytes: Vec<u8> = vec![0; IPV4_HEADER_MIN_SIZE];
    header.serialize(&mut bytes);

    let mut corrupted: Vec<u8> = bytes.clone();
    corrupted[15] ^= 0x40;
    crate::ensure_eq!(Ipv4Header::parse(&corrupted).is_err(), true);
    crate::ensure_eq!(Ipv4Header::parse(&bytes[..19]).is_err(), true);

    let mut v6: Vec<u8> = bytes.clone();
    v6[0] = 0x65;
    crate::ensure_eq!(Ipv4Header::parse(&v6).is_err(), true);

    // Padding after the declared length is tolerated.
    bytes.extend_from_slice(&[0; 6]);
    crate::ensure_eq!(Ipv4Header::parse(&bytes)?.get_total_length(), IPV4_HEADER_MIN_SIZE);
    Ok(())
}

#[test]
fn fragmentation_round_trip() -> Result<()> {
    let mtu: usize = DEFAULT_MTU;
    for len in [mtu - 1, mtu, mtu + 1, 10 * mtu + 7] {
        round_trip(len, mtu, false)?;
        round_trip(len, mtu, true)?;
    }
    Ok(())
}

#[test]
fn fragments_are_eight_byte_aligned() -> Result<()> {
    let header: Ipv4Header = udp_header(9);
    let fragments: Vec<Vec<u8>> = fragment(&header, &payload(1000), 300)?;
    for f in &fragments[..fragments.len() - 1] {
        let h: Ipv4Header = Ipv4Header::parse(f)?;
        crate::ensure_eq!((h.get_total_length() - h.compute_size()) % 8, 0);
        crate::ensure_eq!(h.get_more_fragments(), true);
    }
    let last: Ipv4Header = Ipv4Header::parse(&fragments[fragments.len() - 1])?;
    crate::ensure_eq!(last.get_more_fragments(), false);
    Ok(())
}

#[test]
fn only_copied_options_follow_the_first_fragment() -> Result<()> {
    let mut header: Ipv4Header = udp_header(3);
    // Record route: not copied.
    header.push_option(&[IPOPT_RR, 7, 4, 0, 0, 0, 0])?;
    // Loose source route: copied.
    header.push_option(&[IPOPT_LSRR, 7, 4, 10, 0, 0, 9])?;
    let fragments: Vec<Vec<u8>> = fragment(&header, &payload(600), 256)?;
    crate::ensure_eq!(fragments.len() > 2, true);

    let first: Ipv4Header = Ipv4Header::parse(&fragments[0])?;
    let kinds: Vec<u8> = first.iter_options().map(|(kind, _)| kind).collect();
    crate::ensure_eq!(kinds, vec![IPOPT_RR, IPOPT_LSRR]);

    for f in &fragments[1..] {
        let h: Ipv4Header = Ipv4Header::parse(f)?;
        let kinds: Vec<u8> = h.iter_options().map(|(kind, _)| kind).collect();
        crate::ensure_eq!(kinds, vec![IPOPT_LSRR]);
        crate::ensure_eq!(h.compute_size() % 4, 0);
    }
    Ok(())
}

#[test]
fn dont_fragment_is_honored() -> Result<()> {
    let mut header: Ipv4Header = udp_header(4);
    header.set_dont_fragment(true);
    crate::ensure_eq!(fragment(&header, &payload(2000), DEFAULT_MTU).is_err(), true);
    Ok(())
}

#[test]
fn duplicate_fragments_do_not_complete_early() -> Result<()> {
    let header: Ipv4Header = udp_header(5);
    let fragments: Vec<Vec<u8>> = fragment(&header, &payload(3000), DEFAULT_MTU)?;
    crate::ensure_eq!(fragments.len(), 3);
    let mut reassembly: Reassembly = Reassembly::new(2);
    for f in [&fragments[0], &fragments[0], &fragments[2]] {
        let h: Ipv4Header = Ipv4Header::parse(f)?;
        crate::ensure_eq!(
            reassembly.insert(&h, &f[h.compute_size()..], f).is_none(),
            true
        );
    }
    crate::ensure_eq!(reassembly.get_quote().map(|q| q.len()), Some(IPV4_HEADER_MIN_SIZE + 8));
    let h: Ipv4Header = Ipv4Header::parse(&fragments[1])?;
    crate::ensure_eq!(
        reassembly.insert(&h, &fragments[1][h.compute_size()..], &fragments[1]).is_some(),
        true
    );
    Ok(())
}

#[test]
fn final_fragment_bounds_the_datagram() -> Result<()> {
    let data: Vec<u8> = payload(24);
    let mut reassembly: Reassembly = Reassembly::new(2);
    // Offsets are in bytes here; the wire carries them in 8-byte units.
    let pieces: [(usize, usize, bool); 3] = [(0, 8, true), (16, 24, true), (8, 16, false)];
    let mut whole: Option<Vec<u8>> = None;
    for (first, end, more) in pieces {
        let mut h: Ipv4Header = udp_header(6);
        h.set_fragment(first, more);
        h.set_total_length(IPV4_HEADER_MIN_SIZE + end - first);
        let mut bytes: Vec<u8> = vec![0; IPV4_HEADER_MIN_SIZE + end - first];
        h.serialize(&mut bytes);
        bytes[IPV4_HEADER_MIN_SIZE..].copy_from_slice(&data[first..end]);
        let h: Ipv4Header = Ipv4Header::parse(&bytes)?;
        whole = reassembly.insert(&h, &bytes[IPV4_HEADER_MIN_SIZE..], &bytes);
    }
    let whole: Vec<u8> = match whole {
        Some(whole) => whole,
        None => anyhow::bail!("datagram was not reassembled"),
    };
    crate::ensure_eq!(whole.len(), IPV4_HEADER_MIN_SIZE + 16);
    crate::ensure_eq!(Ipv4Header::parse(&whole)?.get_total_length(), IPV4_HEADER_MIN_SIZE + 16);
    crate::ensure_eq!(&whole[IPV4_HEADER_MIN_SIZE..], &data[..16]);

    // Nothing may land past the end once it is known.
    let mut late: Reassembly = Reassembly::new(2);
    let mut h: Ipv4Header = udp_header(7);
    h.set_fragment(8, false);
    h.set_total_length(IPV4_HEADER_MIN_SIZE + 8);
    let mut bytes: Vec<u8> = vec![0; IPV4_HEADER_MIN_SIZE + 8];
    h.serialize(&mut bytes);
    let h: Ipv4Header = Ipv4Header::parse(&bytes)?;
    crate::ensure_eq!(late.insert(&h, &bytes[IPV4_HEADER_MIN_SIZE..], &bytes).is_none(), true);
    let mut h: Ipv4Header = udp_header(7);
    h.set_fragment(16, true);
    h.set_total_length(IPV4_HEADER_MIN_SIZE + 8);
    h.serialize(&mut bytes);
    let h: Ipv4Header = Ipv4Header::parse(&bytes)?;
    crate::ensure_eq!(late.insert(&h, &bytes[IPV4_HEADER_MIN_SIZE..], &bytes).is_none(), true);
    Ok(())
}

#[test]
fn full_option_area_survives_parsing() -> Result<()> {
    let mut header: Ipv4Header = udp_header(8);
    let mut route: Vec<u8> = vec![0; 39];
    route[0] = IPOPT_LSRR;
    route[1] = 39;
    route[2] = 4;
    header.push_option(&route)?;
    crate::ensure_eq!(header.compute_size(), 60);
    crate::ensure_eq!(header.push_option(&[IPOPT_RR, 7, 4, 0, 0, 0, 0]).is_err(), true);
    crate::ensure_eq!(header.compute_size(), 60);

    header.set_total_length(60);
    let mut bytes: Vec<u8> = vec![0; 60];
    header.serialize(&mut bytes);
    let parsed: Ipv4Header = Ipv4Header::parse(&bytes)?;
    crate::ensure_eq!(parsed.compute_size(), 60);
    let options: Vec<(u8, usize)> = parsed.iter_options().map(|(kind, bytes)| (kind, bytes.len())).collect();
    crate::ensure_eq!(options, vec![(IPOPT_LSRR, 39)]);
    crate::ensure_eq!(parsed.copied_options().len(), 40);
    Ok(())
}
