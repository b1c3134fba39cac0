// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    inetstack::{
        conduit::messenger::{
            fold_checksum,
            sum_words,
        },
        protocols::{
            ip::IpProtocol,
            ipv4::pseudo_header_sum,
            tcp::SeqNumber,
        },
    },
    runtime::fail::Fail,
};
use ::arrayvec::ArrayVec;
use ::libc::EBADMSG;
use ::std::net::Ipv4Addr;

//======================================================================================================================
// Constants
//======================================================================================================================

pub const MIN_TCP_HEADER_SIZE: usize = 20;
pub const MAX_TCP_HEADER_SIZE: usize = 60;
pub const MAX_TCP_OPTIONS: usize = 8;

/// Maximum number of SACK blocks we send or keep from a received segment.
pub const MAX_SACK_BLOCKS: usize = 4;

pub const TCP_FIN: u16 = 0x01;
pub const TCP_SYN: u16 = 0x02;
pub const TCP_RST: u16 = 0x04;
pub const TCP_PSH: u16 = 0x08;
pub const TCP_ACK: u16 = 0x10;
pub const TCP_URG: u16 = 0x20;

const OPT_EOL: u8 = 0;
const OPT_NOP: u8 = 1;
const OPT_MSS: u8 = 2;
const OPT_WINDOW_SCALE: u8 = 3;
const OPT_SACK_PERMITTED: u8 = 4;
const OPT_SACK: u8 = 5;
const OPT_TIMESTAMP: u8 = 8;

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SackBlock {
    pub begin: SeqNumber,
    pub end: SeqNumber,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcpOption {
    NoOperation,
    MaximumSegmentSize(u16),
    WindowScale(u8),
    SackPermitted,
    Sack(ArrayVec<SackBlock, MAX_SACK_BLOCKS>),
    Timestamp { sender_timestamp: u32, echo_timestamp: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_num: SeqNumber,
    pub ack_num: SeqNumber,

    pub urg: bool,
    pub ack: bool,
    pub psh: bool,
    pub rst: bool,
    pub syn: bool,
    pub fin: bool,

    pub window_size: u16,
    pub urgent_pointer: u16,

    options: ArrayVec<TcpOption, MAX_TCP_OPTIONS>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl TcpOption {
    fn compute_size(&self) -> usize {
        match self {
            TcpOption::NoOperation => 1,
            TcpOption::MaximumSegmentSize(..) => 4,
            TcpOption::WindowScale(..) => 3,
            TcpOption::SackPermitted => 2,
            TcpOption::Sack(blocks) => 2 + 8 * blocks.len(),
            TcpOption::Timestamp { .. } => 10,
        }
    }

    fn serialize(&self, buf: &mut [u8]) -> usize {
        match self {
            TcpOption::NoOperation => {
                buf[0] = OPT_NOP;
            },
            TcpOption::MaximumSegmentSize(mss) => {
                buf[0] = OPT_MSS;
                buf[1] = 4;
                buf[2..4].copy_from_slice(&mss.to_be_bytes());
            },
            TcpOption::WindowScale(scale) => {
                buf[0] = OPT_WINDOW_SCALE;
                buf[1] = 3;
                buf[2] = *scale;
            },
            TcpOption::SackPermitted => {
                buf[0] = OPT_SACK_PERMITTED;
                buf[1] = 2;
            },
            TcpOption::Sack(blocks) => {
                buf[0] = OPT_SACK;
                buf[1] = (2 + 8 * blocks.len()) as u8;
                for (i, block) in blocks.iter().enumerate() {
                    let at: usize = 2 + 8 * i;
                    buf[at..at + 4].copy_from_slice(&u32::from(block.begin).to_be_bytes());
                    buf[at + 4..at + 8].copy_from_slice(&u32::from(block.end).to_be_bytes());
                }
            },
            TcpOption::Timestamp {
                sender_timestamp,
                echo_timestamp,
            } => {
                buf[0] = OPT_TIMESTAMP;
                buf[1] = 10;
                buf[2..6].copy_from_slice(&sender_timestamp.to_be_bytes());
                buf[6..10].copy_from_slice(&echo_timestamp.to_be_bytes());
            },
        }
        self.compute_size()
    }

    /// Decodes a single option whose kind and length bytes have been checked already. Returns `None` for kinds we do
    /// not understand; those are skipped.
    fn parse(kind: u8, body: &[u8]) -> Result<Option<Self>, Fail> {
        let option: TcpOption = match kind {
            OPT_MSS => {
                if body.len() != 2 {
                    return Err(Fail::new(EBADMSG, "invalid MSS option length"));
                }
                TcpOption::MaximumSegmentSize(u16::from_be_bytes([body[0], body[1]]))
            },
            OPT_WINDOW_SCALE => {
                if body.len() != 1 {
                    return Err(Fail::new(EBADMSG, "invalid window scale option length"));
                }
                TcpOption::WindowScale(body[0])
            },
            OPT_SACK_PERMITTED => {
                if !body.is_empty() {
                    return Err(Fail::new(EBADMSG, "invalid SACK permitted option length"));
                }
                TcpOption::SackPermitted
            },
            OPT_SACK => {
                if body.len() % 8 != 0 {
                    return Err(Fail::new(EBADMSG, "invalid SACK option length"));
                }
                let mut blocks: ArrayVec<SackBlock, MAX_SACK_BLOCKS> = ArrayVec::new();
                for edge in body.chunks_exact(8).take(MAX_SACK_BLOCKS) {
                    blocks.push(SackBlock {
                        begin: SeqNumber::from(u32::from_be_bytes([edge[0], edge[1], edge[2], edge[3]])),
                        end: SeqNumber::from(u32::from_be_bytes([edge[4], edge[5], edge[6], edge[7]])),
                    });
                }
                TcpOption::Sack(blocks)
            },
            OPT_TIMESTAMP => {
                if body.len() != 8 {
                    return Err(Fail::new(EBADMSG, "invalid timestamp option length"));
                }
                TcpOption::Timestamp {
                    sender_timestamp: u32::from_be_bytes([body[0], body[1], body[2], body[3]]),
                    echo_timestamp: u32::from_be_bytes([body[4], body[5], body[6], body[7]]),
                }
            },
            _ => return Ok(None),
        };
        Ok(Some(option))
    }
}

impl TcpHeader {
    pub fn new(src_port: u16, dst_port: u16) -> Self {
        Self {
            src_port,
            dst_port,
            seq_num: SeqNumber::from(0),
            ack_num: SeqNumber::from(0),
            urg: false,
            ack: false,
            psh: false,
            rst: false,
            syn: false,
            fin: false,
            window_size: 0,
            urgent_pointer: 0,
            options: ArrayVec::new(),
        }
    }

    /// Parses the segment in `buf`, which spans exactly the IP payload. Returns the header and its length in bytes.
    pub fn parse(
        src: Ipv4Addr,
        dst: Ipv4Addr,
        buf: &[u8],
        rx_checksum_offload: bool,
    ) -> Result<(Self, usize), Fail> {
        if buf.len() < MIN_TCP_HEADER_SIZE {
            return Err(Fail::new(EBADMSG, "TCP segment too small"));
        }
        let data_offset: usize = (buf[12] >> 4) as usize * 4;
        if data_offset < MIN_TCP_HEADER_SIZE {
            return Err(Fail::new(EBADMSG, "TCP data offset too small"));
        }
        if data_offset > buf.len() {
            return Err(Fail::new(EBADMSG, "TCP data offset too large"));
        }
        if !rx_checksum_offload && !Self::verify_checksum(src, dst, buf) {
            return Err(Fail::new(EBADMSG, "TCP checksum mismatch"));
        }

        let mut header: TcpHeader = TcpHeader::new(
            u16::from_be_bytes([buf[0], buf[1]]),
            u16::from_be_bytes([buf[2], buf[3]]),
        );
        if header.src_port == 0 || header.dst_port == 0 {
            return Err(Fail::new(EBADMSG, "TCP port zero"));
        }
        header.seq_num = SeqNumber::from(u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]));
        header.ack_num = SeqNumber::from(u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]));
        header.set_flags(u16::from(buf[13]));
        header.window_size = u16::from_be_bytes([buf[14], buf[15]]);
        header.urgent_pointer = u16::from_be_bytes([buf[18], buf[19]]);

        let mut options: &[u8] = &buf[MIN_TCP_HEADER_SIZE..data_offset];
        while let Some(&kind) = options.first() {
            match kind {
                OPT_EOL => break,
                OPT_NOP => {
                    options = &options[1..];
                    continue;
                },
                _ => (),
            }
            if options.len() < 2 {
                return Err(Fail::new(EBADMSG, "truncated TCP option"));
            }
            let len: usize = options[1] as usize;
            if len < 2 || len > options.len() {
                return Err(Fail::new(EBADMSG, "invalid TCP option length"));
            }
            if let Some(option) = TcpOption::parse(kind, &options[2..len])? {
                if header.options.try_push(option).is_err() {
                    return Err(Fail::new(EBADMSG, "too many TCP options"));
                }
            }
            options = &options[len..];
        }

        Ok((header, data_offset))
    }

    /// Serializes the header into `buf`, which must be [Self::compute_size] bytes. `data` is the payload that follows
    /// it; together they are covered by the checksum.
    pub fn serialize(&self, buf: &mut [u8], src: Ipv4Addr, dst: Ipv4Addr, data: &[u8], tx_checksum_offload: bool) {
        let size: usize = self.compute_size();
        let buf: &mut [u8] = &mut buf[..size];
        buf[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        buf[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        buf[4..8].copy_from_slice(&u32::from(self.seq_num).to_be_bytes());
        buf[8..12].copy_from_slice(&u32::from(self.ack_num).to_be_bytes());
        buf[12] = ((size / 4) as u8) << 4;
        buf[13] = self.get_flags() as u8;
        buf[14..16].copy_from_slice(&self.window_size.to_be_bytes());
        // Checksum (bytes 16..18) goes in last.
        buf[16] = 0;
        buf[17] = 0;
        buf[18..20].copy_from_slice(&self.urgent_pointer.to_be_bytes());

        let mut cur_pos: usize = MIN_TCP_HEADER_SIZE;
        for option in &self.options {
            cur_pos += option.serialize(&mut buf[cur_pos..]);
        }
        // Pad with end-of-option-list bytes.
        for byte in &mut buf[cur_pos..] {
            *byte = OPT_EOL;
        }

        if !tx_checksum_offload {
            let sum: u32 = pseudo_header_sum(src, dst, IpProtocol::TCP as u8, size + data.len());
            let checksum: u16 = fold_checksum(sum_words(data, sum_words(buf, sum)));
            buf[16..18].copy_from_slice(&checksum.to_be_bytes());
        }
    }

    /// Checks the checksum of a whole segment against the pseudo header.
    pub fn verify_checksum(src: Ipv4Addr, dst: Ipv4Addr, segment: &[u8]) -> bool {
        let sum: u32 = pseudo_header_sum(src, dst, IpProtocol::TCP as u8, segment.len());
        fold_checksum(sum_words(segment, sum)) == 0
    }

    /// Header length including options, rounded up to 32 bits.
    pub fn compute_size(&self) -> usize {
        let size: usize = MIN_TCP_HEADER_SIZE + self.options.iter().map(|o| o.compute_size()).sum::<usize>();
        (size + 3) & !0x3
    }

    pub fn iter_options(&self) -> impl Iterator<Item = &TcpOption> {
        self.options.iter()
    }

    pub fn push_option(&mut self, option: TcpOption) {
        self.options.push(option);
    }

    /// Control bits in wire order.
    pub fn get_flags(&self) -> u16 {
        let mut flags: u16 = 0;
        for (set, bit) in [
            (self.fin, TCP_FIN),
            (self.syn, TCP_SYN),
            (self.rst, TCP_RST),
            (self.psh, TCP_PSH),
            (self.ack, TCP_ACK),
            (self.urg, TCP_URG),
        ] {
            if set {
                flags |= bit;
            }
        }
        flags
    }

    pub fn set_flags(&mut self, flags: u16) {
        self.fin = flags & TCP_FIN != 0;
        self.syn = flags & TCP_SYN != 0;
        self.rst = flags & TCP_RST != 0;
        self.psh = flags & TCP_PSH != 0;
        self.ack = flags & TCP_ACK != 0;
        self.urg = flags & TCP_URG != 0;
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        SackBlock,
        TcpHeader,
        TcpOption,
        MIN_TCP_HEADER_SIZE,
        TCP_ACK,
        TCP_SYN,
    };
    use crate::inetstack::protocols::tcp::SeqNumber;
    use ::anyhow::Result;
    use ::arrayvec::ArrayVec;
    use ::std::net::Ipv4Addr;

    const SRC: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
    const DST: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 2);

    fn segment(header: &TcpHeader, data: &[u8]) -> Vec<u8> {
        let size: usize = header.compute_size();
        let mut buf: Vec<u8> = vec![0; size + data.len()];
        buf[size..].copy_from_slice(data);
        header.serialize(&mut buf[..size], SRC, DST, data, false);
        buf
    }

    #[test]
    fn syn_options_are_padded() -> Result<()> {
        let mut header: TcpHeader = TcpHeader::new(49152, 80);
        header.seq_num = SeqNumber::from(0xfffffff0);
        header.set_flags(TCP_SYN);
        header.window_size = 8192;
        header.push_option(TcpOption::MaximumSegmentSize(1460));
        header.push_option(TcpOption::SackPermitted);
        crate::ensure_eq!(header.compute_size(), MIN_TCP_HEADER_SIZE + 8);

        let buf: Vec<u8> = segment(&header, &[]);
        crate::ensure_eq!(buf[12] >> 4, 7);
        crate::ensure_eq!(&buf[20..28], &[2, 4, 0x05, 0xb4, 4, 2, 0, 0]);

        let (parsed, len) = TcpHeader::parse(SRC, DST, &buf, false)?;
        crate::ensure_eq!(len, 28);
        crate::ensure_eq!(parsed, header);
        Ok(())
    }

    #[test]
    fn sack_blocks_follow_two_nops() -> Result<()> {
        let mut blocks: ArrayVec<SackBlock, 4> = ArrayVec::new();
        blocks.push(SackBlock {
            begin: SeqNumber::from(3000),
            end: SeqNumber::from(4000),
        });
        blocks.push(SackBlock {
            begin: SeqNumber::from(1000),
            end: SeqNumber::from(2000),
        });
        let mut header: TcpHeader = TcpHeader::new(80, 49152);
        header.set_flags(TCP_ACK);
        header.push_option(TcpOption::NoOperation);
        header.push_option(TcpOption::NoOperation);
        header.push_option(TcpOption::Sack(blocks.clone()));

        let buf: Vec<u8> = segment(&header, b"data");
        crate::ensure_eq!(&buf[20..24], &[1, 1, 5, 18]);
        let (parsed, len) = TcpHeader::parse(SRC, DST, &buf, false)?;
        crate::ensure_eq!(len, 40);
        crate::ensure_eq!(
            parsed.iter_options().find_map(|o| match o {
                TcpOption::Sack(b) => Some(b.clone()),
                _ => None,
            }),
            Some(blocks)
        );
        Ok(())
    }

    #[test]
    fn corrupt_segments_are_rejected() -> Result<()> {
        let mut header: TcpHeader = TcpHeader::new(80, 49152);
        header.set_flags(TCP_ACK);
        let mut buf: Vec<u8> = segment(&header, b"payload");
        crate::ensure_eq!(TcpHeader::parse(SRC, DST, &buf, false).is_ok(), true);

        // Wrong pseudo header.
        crate::ensure_eq!(TcpHeader::parse(SRC, SRC, &buf, false).is_err(), true);

        // Bad data offset.
        buf[12] = 4 << 4;
        crate::ensure_eq!(TcpHeader::parse(SRC, DST, &buf, true).is_err(), true);
        buf[12] = 15 << 4;
        crate::ensure_eq!(TcpHeader::parse(SRC, DST, &buf, true).is_err(), true);

        // Option running past the header.
        buf[12] = 6 << 4;
        buf[20..24].copy_from_slice(&[2, 8, 0, 0]);
        crate::ensure_eq!(TcpHeader::parse(SRC, DST, &buf, true).is_err(), true);
        Ok(())
    }

    #[test]
    fn unknown_options_are_skipped() -> Result<()> {
        let header: TcpHeader = TcpHeader::new(80, 49152);
        let mut buf: Vec<u8> = segment(&header, &[]);
        buf.splice(20..20, [30, 4, 0xaa, 0xbb]);
        buf[12] = 6 << 4;
        let (parsed, len) = TcpHeader::parse(SRC, DST, &buf, true)?;
        crate::ensure_eq!(len, 24);
        crate::ensure_eq!(parsed.iter_options().count(), 0);
        Ok(())
    }
}
