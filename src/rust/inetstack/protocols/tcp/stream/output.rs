// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use super::{
    State,
    Stream,
    StreamHost,
    StreamTimer,
};
use crate::inetstack::{
    conduit::messenger::Messenger,
    protocols::{
        ethernet2::ETHERNET2_HEADER_SIZE,
        ip::IpProtocol,
        ipv4::IPV4_HEADER_MAX_SIZE,
        tcp::{
            constants::{
                LIMITED_THRESH,
                MAX_WINDOW,
                RXMIT_THRESH,
            },
            header::{
                SackBlock,
                TcpHeader,
                TcpOption,
                MAX_SACK_BLOCKS,
                MAX_TCP_HEADER_SIZE,
                MIN_TCP_HEADER_SIZE,
                TCP_ACK,
                TCP_FIN,
                TCP_PSH,
                TCP_RST,
                TCP_SYN,
                TCP_URG,
            },
            SeqNumber,
        },
    },
};
use ::arrayvec::ArrayVec;
use ::std::net::SocketAddrV4;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Room reserved in front of a segment for the headers below TCP.
const SEGMENT_HEADROOM: usize = MAX_TCP_HEADER_SIZE + IPV4_HEADER_MAX_SIZE + ETHERNET2_HEADER_SIZE;

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Stream {
    /// Sends whatever the windows allow: data, control flags and pending acknowledgements.
    pub fn output(&mut self, host: &mut dyn StreamHost) {
        loop {
            self.hole = None;
            self.onxt = self.send_next;
            let (sendable, flag): (i32, u16) = match self.state {
                State::Closed | State::Listen => return,
                State::SynSent | State::SynReceived => self.get_sendable_with_syn(),
                State::Established | State::FinWait2 | State::CloseWait | State::TimeWait => {
                    (self.get_sendable(), 0)
                },
                State::FinWait1 | State::LastAck | State::Closing => self.get_sendable_with_fin(),
            };
            if !self.send(host, sendable, flag) {
                break;
            }
        }
    }

    fn get_sendable_with_syn(&self) -> (i32, u16) {
        if self.send_next != self.iss {
            (0, 0)
        } else {
            (1, TCP_SYN)
        }
    }

    fn get_sendable_with_fin(&mut self) -> (i32, u16) {
        let sendable: i32 = self.get_sendable();
        if sendable < 0 {
            // FIN already sent.
            (0, 0)
        } else if self.hole.is_none() {
            (sendable + 1, TCP_FIN)
        } else {
            (sendable, 0)
        }
    }

    /// Bytes that could go out next, ignoring the windows. Picks the SACK hole to fill while recovering.
    fn get_sendable(&mut self) -> i32 {
        if self.send_win == 0 && self.send_ring.get_used() > 0 {
            // Persisting: retry with the first unacknowledged byte.
            if self.rxmit_timer.is_none() {
                self.onxt = self.send_una;
                self.send_next = self.send_una;
            }
            self.rtt_timing = None;
            self.send_recover = self.send_max;
            self.dup_acks = 0;
            self.hole = None;
            self.scoreboard.clear();
            self.send_fack = self.send_una;
            self.rxmit_data = 0;
            self.send_awin = 0;
            self.fast_rxmit = false;
        }

        if self.dup_acks >= RXMIT_THRESH {
            if self.sack {
                self.hole = self.scoreboard.get_sack_hole(self.fast_rxmit, self.send_una);
                match self.hole.and_then(|i| self.scoreboard.get(i)) {
                    Some(hole) => self.send_next = hole.rxmit,
                    // No SACK information yet: resend the first unacknowledged segment.
                    None if self.fast_rxmit && self.scoreboard.is_empty() => self.send_next = self.send_una,
                    None => (),
                }
            } else if self.fast_rxmit {
                self.send_next = self.send_una;
            }
        }

        let mut sendable: i32 = self.send_ring.get_used() as i32 - (self.send_next - self.send_una);
        if let Some(hole) = self.hole.and_then(|i| self.scoreboard.get(i)) {
            sendable = sendable.min(hole.end - hole.rxmit);
        }
        sendable
    }

    /// Does receiver side silly window avoidance (RFC 1122 4.2.3.3) call for a window update?
    fn window_update_due(&self) -> bool {
        let unused: i32 = (self.recv_ring.get_unused() as i32).min(MAX_WINDOW);
        let reduction: i32 = unused - self.recv_win;
        (self.recv_ring.get_size() as i32 / 2).min(2 * self.mss) <= reduction
            || (self.mss <= reduction && self.recv_win < self.mss)
    }

    /// Decides whether a segment of `len` bytes should go out now (Nagle and silly window avoidance).
    fn can_send(&mut self, len: i32, flag: u16) -> bool {
        if self.window_update_due() {
            self.recv_win = (self.recv_ring.get_unused() as i32).min(MAX_WINDOW);
            return true;
        }
        if self.ack_now || flag & (TCP_RST | TCP_FIN | TCP_SYN) != 0 {
            return true;
        }
        if len <= 0 {
            return false;
        }
        if self.mss <= len {
            return true;
        }
        let acked: bool = !self.nagle || self.send_next == self.send_una;
        if acked && flag & TCP_PSH != 0 {
            return true;
        }
        if acked && self.send_max_win / 2 <= len {
            return true;
        }
        if self.send_next < self.send_max {
            return true;
        }
        self.fast_rxmit
    }

    /// Sends one segment of at most `sendable` bytes of sequence space. Returns false if nothing went out.
    fn send(&mut self, host: &mut dyn StreamHost, sendable: i32, flag: u16) -> bool {
        let mut flag: u16 = flag;
        let sack_recovery: bool = self.sack && self.dup_acks >= RXMIT_THRESH;

        let mut win: i32 = if sack_recovery || self.dup_acks == LIMITED_THRESH {
            self.send_win
        } else {
            self.send_win.min(self.c_win)
        };
        if win == 0 && self.rxmit_timer.is_none() && sendable > 0 {
            // Zero window: force out a single byte.
            if !self.persist {
                self.persist = true;
                self.r0 = Some(host.now());
            }
            if flag & TCP_SYN == 0 {
                self.ack_now = true;
            }
            win = 1;
        }

        let mut useable: i32 = (self.send_una + win.max(0) as u32) - self.send_next;
        if sack_recovery && !self.fast_rxmit && self.c_win - self.send_awin < self.mss {
            // Pipe is full.
            useable = 0;
        }
        if self.dup_acks == LIMITED_THRESH {
            useable = useable.min((self.c_win + LIMITED_THRESH * self.mss - self.send_awin).max(0));
        }

        let has_ack: bool = self.state != State::SynSent;
        let mut header: TcpHeader = TcpHeader::new(self.local.port(), self.remote.port());
        self.push_options(&mut header, flag, has_ack);
        let optlen: i32 = (header.compute_size() - MIN_TCP_HEADER_SIZE) as i32;

        let mut len: i32 = (self.mss - optlen).min(sendable).min(useable);
        if len > 0 && len == sendable && self.hole.is_none() && flag & (TCP_SYN | TCP_RST | TCP_FIN) == 0 {
            flag |= TCP_PSH;
        }
        if len < sendable {
            flag &= !TCP_FIN;
        }
        if len <= 0 && flag & (TCP_SYN | TCP_RST | TCP_FIN) == 0 && !self.ack_now && !self.window_update_due() {
            if self.recv_acked < self.recv_next {
                // Data is owed an ACK; let it ride on later traffic or the delayed ACK timer.
                self.start_ack_timer(host);
            }
            return false;
        }
        if !self.can_send(len, flag) {
            if self.send_next < self.onxt {
                self.send_next = self.onxt;
            }
            if len > 0 {
                self.start_rxmit_timer(host);
            }
            if self.recv_acked < self.recv_next {
                self.start_ack_timer(host);
            }
            return false;
        }
        len = len.max(0);

        let control: i32 = (flag & TCP_SYN != 0) as i32 + (flag & TCP_FIN != 0) as i32;
        let count: usize = (len - control).max(0) as usize;
        let offset: usize = (self.send_next - self.send_una).max(0) as usize;
        let mut payload: Vec<u8> = vec![0; count];
        self.send_ring.peek(&mut payload, offset);

        self.recv_acked = if self.state == State::SynReceived {
            self.irs + 1
        } else {
            self.recv_next
        };
        let seq: SeqNumber = if len > 0 { self.send_next } else { self.send_max };
        header.seq_num = seq;
        if seq < self.send_up {
            flag |= TCP_URG;
            header.urgent_pointer = (self.send_up - seq).min(u16::MAX as i32) as u16;
        } else {
            self.send_up = self.send_una;
        }
        if has_ack {
            flag |= TCP_ACK;
            header.ack_num = self.recv_acked;
        }
        header.set_flags(flag);
        header.window_size = self.recv_win.clamp(0, MAX_WINDOW) as u16;
        self.ack_now = false;
        self.stop_ack_timer(host);

        trace!(
            "send(): flags={:#x} seq={} ack={} len={:?} win={:?}",
            flag,
            header.seq_num,
            header.ack_num,
            count,
            header.window_size
        );
        host.transmit(build_segment(&header, &payload, self.local, self.remote));

        let start: SeqNumber = self.send_next;
        self.send_next = self.send_next + len as u32;
        if self.send_max < self.send_next {
            self.send_max = self.send_next;
            if self.rtt_timing.is_none() {
                self.rtt_timing = Some(host.now());
                self.rtt_seq = start;
            }
        }
        if self.send_next != self.send_una {
            self.start_rxmit_timer(host);
        }
        if let Some(i) = self.hole {
            self.scoreboard.advance(i, len as u32);
            self.rxmit_data += len;
        }
        self.send_awin = (self.send_max - self.send_fack) + self.rxmit_data;
        self.fast_rxmit = false;
        if self.send_next < self.onxt {
            self.send_next = self.onxt;
        }
        true
    }

    fn push_options(&self, header: &mut TcpHeader, flag: u16, has_ack: bool) {
        if flag & TCP_SYN != 0 {
            header.push_option(TcpOption::MaximumSegmentSize(self.mss.clamp(0, u16::MAX as i32) as u16));
            let offer_sack: bool = match self.state {
                State::SynSent => self.config.get_sack_enabled(),
                _ => self.sack,
            };
            if offer_sack {
                header.push_option(TcpOption::SackPermitted);
            }
            return;
        }
        if self.sack && flag & TCP_RST == 0 && has_ack && !self.asb.is_empty() {
            // Align the blocks on a word boundary.
            header.push_option(TcpOption::NoOperation);
            header.push_option(TcpOption::NoOperation);
            let mut blocks: ArrayVec<SackBlock, MAX_SACK_BLOCKS> = ArrayVec::new();
            for block in self.asb.iter().rev() {
                let begin: SeqNumber = self.recv_next + self.recv_ring.offset_of(block) as u32;
                blocks.push(SackBlock {
                    begin,
                    end: begin + block.len() as u32,
                });
            }
            header.push_option(TcpOption::Sack(blocks));
        }
    }

    /// Queues an acknowledgement for the delayed ACK timer.
    fn start_ack_timer(&mut self, host: &mut dyn StreamHost) {
        if self.ack_timer.is_none() {
            self.ack_timer = Some(host.schedule(StreamTimer::DelayedAck, self.config.get_ack_delay_timeout()));
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Wraps a segment into a messenger addressed from `local` to `remote`. The checksum is left to the TCP conduit.
pub(super) fn build_segment(header: &TcpHeader, payload: &[u8], local: SocketAddrV4, remote: SocketAddrV4) -> Messenger {
    let mut m: Messenger = Messenger::new_output(payload, SEGMENT_HEADROOM);
    match m.prepend(header.compute_size()) {
        Ok(buf) => header.serialize(buf, *local.ip(), *remote.ip(), payload, true),
        Err(e) => warn!("build_segment(): {:?}", e),
    }
    m.set_type(IpProtocol::TCP as u32);
    m.set_local(Some(*local.ip()));
    m.set_remote(Some(*remote.ip()));
    m.set_local_port(local.port());
    m.set_remote_port(remote.port());
    m
}
