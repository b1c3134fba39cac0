// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use super::{
    Segment,
    State,
    Stream,
    StreamHost,
    StreamSignal,
};
use crate::{
    inetstack::protocols::tcp::{
        constants::{
            DEF_SSTHRESH,
            LIMITED_THRESH,
            MAX_WINDOW,
            MSL,
            RXMIT_THRESH,
        },
        header::{
            TcpHeader,
            TcpOption,
            TCP_ACK,
            TCP_FIN,
            TCP_PSH,
            TCP_RST,
            TCP_SYN,
            TCP_URG,
        },
        SeqNumber,
    },
    runtime::network::consts::DEFAULT_MSS,
};
use ::libc::{
    ECONNREFUSED,
    ECONNRESET,
};
use ::std::time::Instant;

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Segment {
    fn new(header: &TcpHeader, data_len: usize) -> Self {
        let flag: u16 = header.get_flags();
        let mut len: i32 = data_len as i32;
        if flag & TCP_SYN != 0 {
            len += 1;
        }
        if flag & TCP_FIN != 0 {
            len += 1;
        }
        Self {
            flag,
            seq: header.seq_num,
            ack: header.ack_num,
            urg: header.urgent_pointer,
            win: header.window_size as i32,
            len,
            offset: 0,
        }
    }

    fn has(&self, flag: u16) -> bool {
        self.flag & flag != 0
    }
}

impl Stream {
    /// Processes a segment addressed to this connection. `data` is the payload that follows the header.
    ///
    /// Segments for a listening stream go through [Stream::spawn] instead.
    pub fn input(&mut self, host: &mut dyn StreamHost, header: &TcpHeader, data: &[u8]) {
        let mut seg: Segment = Segment::new(header, data.len());
        trace!(
            "input(): state={:?} flags={:#x} seq={} ack={} len={:?} win={:?}",
            self.state,
            seg.flag,
            seg.seq,
            seg.ack,
            seg.len,
            seg.win
        );
        let respond: bool = match self.state {
            State::Closed => {
                host.transmit_reset(header, data.len(), self.local, self.remote);
                false
            },
            State::Listen => false,
            State::SynSent => self.input_syn_sent(host, header, data, &mut seg),
            State::SynReceived => self.input_syn_received(host, header, data, &mut seg),
            State::Established | State::FinWait1 | State::FinWait2 | State::CloseWait => {
                self.input_synchronized(host, header, data, &mut seg)
            },
            State::LastAck | State::Closing => self.input_closing(host, header, data, &mut seg),
            State::TimeWait => self.input_time_wait(host, header, &mut seg),
        };
        if respond && self.state != State::Closed {
            self.output(host);
        }
    }

    fn input_syn_sent(&mut self, host: &mut dyn StreamHost, header: &TcpHeader, data: &[u8], seg: &mut Segment) -> bool {
        if seg.has(TCP_ACK) && (seg.ack <= self.iss || self.send_max < seg.ack) {
            host.transmit_reset(header, data.len(), self.local, self.remote);
            return false;
        }
        if seg.has(TCP_RST) {
            if seg.has(TCP_ACK) {
                self.err = ECONNREFUSED;
                self.abort(host);
            }
            return false;
        }
        if !seg.has(TCP_SYN) {
            return false;
        }

        self.irs = seg.seq;
        self.recv_acked = seg.seq;
        self.recv_next = seg.seq + 1;
        self.recv_up = self.recv_next;
        if !self.option(header) {
            return false;
        }
        if seg.has(TCP_ACK) && self.iss < seg.ack {
            if let Some(start) = self.rtt_timing {
                let rtt = host.now().saturating_duration_since(start);
                self.update_rto(rtt);
            }
            // Our SYN is acknowledged.
            self.send_una = self.send_una + 1;
            if self.send_next < self.send_una {
                self.send_next = self.send_una;
            }
            self.send_fack = self.send_una;
            self.set_send_window(seg);
            if self.send_una == self.send_max {
                self.stop_rxmit_timer(host);
            }
            self.set_state(host, State::Established);
            host.signal(StreamSignal::Established);
            host.signal(StreamSignal::Changed);
            self.ack_now = true;
        } else {
            // Simultaneous open: resend our SYN along with an ACK.
            self.set_state(host, State::SynReceived);
            self.send_next = self.send_una;
        }

        if !self.trim(seg) {
            return true;
        }
        if seg.has(TCP_ACK) {
            if self.send_max < seg.ack {
                self.ack_now = true;
                return true;
            }
            self.ack(host, seg);
        }
        self.urg(seg);
        if !self.text(host, header, data, seg) {
            return false;
        }
        if seg.has(TCP_FIN) {
            self.receive_fin(host);
            self.set_state(host, State::CloseWait);
        }
        true
    }

    fn input_syn_received(
        &mut self,
        host: &mut dyn StreamHost,
        header: &TcpHeader,
        data: &[u8],
        seg: &mut Segment,
    ) -> bool {
        if seg.has(TCP_ACK) && (seg.ack < self.send_una || self.send_max < seg.ack) {
            host.transmit_reset(header, data.len(), self.local, self.remote);
            return false;
        }
        if seg.seq < self.irs {
            host.transmit_reset(header, data.len(), self.local, self.remote);
            return false;
        }
        if seg.has(TCP_RST) {
            self.reset(host, seg.seq, ECONNREFUSED);
            return false;
        }
        if !self.trim(seg) {
            return true;
        }
        if seg.has(TCP_SYN) {
            host.transmit_reset(header, data.len(), self.local, self.remote);
            self.abort(host);
            return false;
        }
        if !seg.has(TCP_ACK) {
            // E.g. the SYN that created this stream: answer it with our SYN.
            return true;
        }

        if self.iss < seg.ack {
            if self.send_una == self.iss {
                // Our SYN is acknowledged.
                self.send_una = self.send_una + 1;
                if self.send_next < self.send_una {
                    self.send_next = self.send_una;
                }
                self.send_fack = self.send_una;
                if let Some(start) = self.rtt_timing {
                    let rtt = host.now().saturating_duration_since(start);
                    self.update_rto(rtt);
                }
            }
            if self.send_una == self.send_max {
                self.stop_rxmit_timer(host);
            }
            self.set_send_window(seg);
            let next: State = if self.shutwr { State::FinWait1 } else { State::Established };
            self.set_state(host, next);
            host.signal(StreamSignal::Established);
            host.signal(StreamSignal::Changed);
        }
        if !self.option(header) {
            return false;
        }
        let fin_acked: bool = self.ack(host, seg);
        if fin_acked && self.state == State::FinWait1 {
            self.set_state(host, State::FinWait2);
        }

        self.urg(seg);
        if !self.text(host, header, data, seg) {
            return false;
        }
        if seg.has(TCP_FIN) {
            self.receive_fin(host);
            match self.state {
                State::FinWait1 => self.set_state(host, State::Closing),
                State::FinWait2 => self.set_state(host, State::TimeWait),
                _ => self.set_state(host, State::CloseWait),
            }
        }
        true
    }

    /// Input in Established, FinWait1, FinWait2 and CloseWait.
    fn input_synchronized(
        &mut self,
        host: &mut dyn StreamHost,
        header: &TcpHeader,
        data: &[u8],
        seg: &mut Segment,
    ) -> bool {
        if seg.has(TCP_RST) {
            self.reset(host, seg.seq, ECONNRESET);
            return false;
        }
        if !self.trim(seg) {
            return true;
        }
        if seg.has(TCP_SYN) {
            host.transmit_reset(header, data.len(), self.local, self.remote);
            self.abort(host);
            return false;
        }
        if !seg.has(TCP_ACK) {
            return false;
        }
        if self.send_max < seg.ack {
            // Acknowledges something not yet sent.
            self.ack_now = true;
            return true;
        }
        if !self.option(header) {
            return false;
        }
        let fin_acked: bool = self.ack(host, seg);
        if fin_acked && self.state == State::FinWait1 {
            self.set_state(host, State::FinWait2);
        }
        if self.state == State::CloseWait {
            // The peer already sent its FIN.
            return true;
        }

        self.urg(seg);
        if !self.text(host, header, data, seg) {
            return false;
        }
        if seg.has(TCP_FIN) {
            self.receive_fin(host);
            match self.state {
                State::Established => self.set_state(host, State::CloseWait),
                State::FinWait1 => self.set_state(host, State::Closing),
                State::FinWait2 => self.set_state(host, State::TimeWait),
                _ => (),
            }
        }
        true
    }

    /// Input in LastAck and Closing: waiting for the ACK of our FIN.
    fn input_closing(&mut self, host: &mut dyn StreamHost, header: &TcpHeader, data: &[u8], seg: &mut Segment) -> bool {
        if seg.has(TCP_RST) {
            self.reset(host, seg.seq, 0);
            return false;
        }
        if !self.trim(seg) {
            return true;
        }
        if seg.has(TCP_SYN) {
            host.transmit_reset(header, data.len(), self.local, self.remote);
            self.abort(host);
            return false;
        }
        if !seg.has(TCP_ACK) {
            return false;
        }
        if self.send_max < seg.ack {
            self.ack_now = true;
            return true;
        }
        if !self.option(header) {
            return false;
        }
        if self.ack(host, seg) {
            match self.state {
                State::LastAck => {
                    self.err = 0;
                    self.abort(host);
                    return false;
                },
                _ => self.set_state(host, State::TimeWait),
            }
        }
        true
    }

    fn input_time_wait(&mut self, host: &mut dyn StreamHost, header: &TcpHeader, seg: &mut Segment) -> bool {
        if seg.has(TCP_RST) {
            self.reset(host, seg.seq, 0);
            return false;
        }
        if seg.has(TCP_SYN) && !seg.has(TCP_ACK) && self.recv_next <= seg.seq {
            // A new incarnation of the connection.
            debug!("input_time_wait(): new SYN from {:?}, closing the old connection", self.remote);
            self.abort(host);
            return false;
        }
        if !self.trim(seg) {
            return true;
        }
        if !seg.has(TCP_ACK) {
            return false;
        }
        if !self.option(header) {
            return false;
        }
        self.ack(host, seg);
        // Restart the 2MSL wait.
        self.rto = 2 * MSL;
        self.reset_rxmit_timer(host);
        true
    }

    /// Consumes a FIN that arrived in order.
    fn receive_fin(&mut self, host: &mut dyn StreamHost) {
        self.recv_next = self.recv_next + 1;
        self.ack_now = true;
        host.signal(StreamSignal::Changed);
    }

    /// Trims a segment to the receive window. Returns false if nothing of it is acceptable.
    fn trim(&mut self, seg: &mut Segment) -> bool {
        let carried: bool = seg.len > 0;

        // Left edge: drop what was received already.
        let mut todrop: i32 = self.recv_next - seg.seq;
        if todrop > 0 {
            if seg.has(TCP_SYN) {
                seg.flag &= !TCP_SYN;
                seg.seq = seg.seq + 1;
                seg.len -= 1;
                if seg.urg > 1 {
                    seg.urg -= 1;
                } else {
                    seg.flag &= !TCP_URG;
                }
                todrop -= 1;
            }
        }
        if todrop > 0 {
            if seg.len <= todrop {
                // Complete duplicate.
                seg.flag &= !TCP_FIN;
                let data_len: i32 = seg.len.max(0);
                seg.offset += data_len as usize;
                seg.seq = seg.seq + data_len as u32;
                seg.len = 0;
                if carried {
                    self.ack_now = true;
                }
            } else {
                seg.offset += todrop as usize;
                seg.seq = seg.seq + todrop as u32;
                seg.len -= todrop;
                if i32::from(seg.urg) > todrop {
                    seg.urg -= todrop as u16;
                } else {
                    seg.flag &= !TCP_URG;
                    seg.urg = 0;
                }
            }
        }

        // Right edge: drop what does not fit in the window.
        let window_end: SeqNumber = self.recv_next + self.recv_win as u32;
        let mut excess: i32 = (seg.seq + seg.len.max(0) as u32) - window_end;
        if excess > 0 {
            if seg.has(TCP_FIN) {
                seg.flag &= !TCP_FIN;
                seg.len -= 1;
                excess -= 1;
            }
            if excess > 0 {
                seg.len -= excess.min(seg.len);
                seg.flag &= !TCP_PSH;
            }
            // Answer zero window checks.
            self.ack_now = true;
        }

        if seg.len > 0 {
            return true;
        }
        let acceptable: bool = if self.recv_win == 0 {
            seg.seq == self.recv_next
        } else {
            self.recv_next <= seg.seq && seg.seq < window_end
        };
        if !acceptable && carried {
            self.ack_now = true;
        }
        acceptable
    }

    /// Handles a reset carrying sequence number `seq`. It is honored only if it falls in the receive window.
    fn reset(&mut self, host: &mut dyn StreamHost, seq: SeqNumber, errno: i32) {
        let acceptable: bool = if self.recv_win == 0 {
            seq == self.recv_next
        } else {
            self.recv_next <= seq && seq < self.recv_next + self.recv_win as u32
        };
        if !acceptable {
            debug!("reset(): dropping out of window reset (seq={}, recv_next={})", seq, self.recv_next);
            return;
        }
        if errno != 0 {
            self.err = errno;
        }
        self.abort(host);
    }

    /// Processes the options of a segment. Returns false if they are malformed for the segment they arrived on.
    pub(super) fn option(&mut self, header: &TcpHeader) -> bool {
        let mut peer_mss: Option<u16> = None;
        for option in header.iter_options() {
            match option {
                TcpOption::MaximumSegmentSize(mss) => {
                    if !header.syn || *mss == 0 {
                        return false;
                    }
                    peer_mss = Some(*mss);
                },
                TcpOption::SackPermitted => {
                    if !header.syn {
                        return false;
                    }
                    self.sack = self.config.get_sack_enabled();
                },
                TcpOption::Sack(blocks) => {
                    if self.sack {
                        self.rxmit_data = self.scoreboard.update(
                            header.ack_num,
                            blocks,
                            self.send_una,
                            self.send_max,
                            self.mss,
                            &mut self.send_fack,
                        );
                    }
                },
                _ => (),
            }
        }
        if header.syn {
            let peer_mss: i32 = peer_mss.map_or(DEFAULT_MSS as i32, i32::from);
            self.mss = self.mss.min(peer_mss);
            self.c_win = 2 * self.mss;
            self.ss_thresh = DEF_SSTHRESH;
        }
        true
    }

    /// Processes the acknowledgement of a segment. Returns true if it covers our FIN.
    fn ack(&mut self, host: &mut dyn StreamHost, seg: &Segment) -> bool {
        let now: Instant = host.now();
        if seg.ack <= self.send_una {
            if seg.ack < self.send_una {
                // Old acknowledgement.
                return false;
            }
            let duplicate: bool = seg.len == 0 && seg.win == self.send_win && self.send_una != self.send_max;
            if duplicate {
                self.duplicate_ack(host, seg);
                return false;
            }
            if self.dup_acks < RXMIT_THRESH {
                self.dup_acks = 0;
            }
            self.update_send_window(seg);
            self.check_persist(host, now);
            return false;
        }

        let acked: i32 = seg.ack - self.send_una;
        if self.dup_acks >= RXMIT_THRESH {
            if seg.ack < self.send_recover {
                // Partial acknowledgement: the next hole is lost too.
                self.fast_rxmit = true;
                if !self.partial_acked {
                    self.partial_acked = true;
                    self.reset_rxmit_timer(host);
                }
                self.open_window(acked);
            } else {
                // Recovery completed.
                self.c_win = if self.sack {
                    self.ss_thresh.min(self.send_awin + self.mss)
                } else {
                    self.ss_thresh.min((self.send_max - seg.ack) + self.mss)
                };
                self.dup_acks = 0;
                self.partial_acked = false;
            }
        } else {
            self.dup_acks = 0;
            self.reset_rxmit_timer(host);
            self.open_window(acked);
        }

        if self.sack {
            self.scoreboard.delete_sack_holes(seg.ack, self.send_una);
            self.rxmit_data = self.scoreboard.get_rxmit_data();
        }
        self.send_una = seg.ack;
        if self.send_recover < self.send_una {
            self.send_recover = self.send_una;
        }
        if self.send_next < self.send_una {
            self.send_next = self.send_una;
        }
        if self.send_fack < self.send_una {
            self.send_fack = self.send_una;
        }
        self.send_awin = (self.send_max - self.send_fack) + self.rxmit_data;
        self.rxmit_count = 0;
        self.r0 = Some(now);

        let mut bytes: usize = acked as usize;
        let mut fin_acked: bool = false;
        if self.send_ring.get_used() < bytes {
            fin_acked = true;
            bytes -= 1;
        }
        self.send_ring.discard(bytes);
        host.signal(StreamSignal::Changed);

        if let Some(start) = self.rtt_timing {
            if self.rtt_seq < seg.ack {
                self.update_rto(now.saturating_duration_since(start));
            }
        }
        self.update_send_window(seg);
        self.check_persist(host, now);
        if self.send_una == self.send_max {
            self.stop_rxmit_timer(host);
        }
        fin_acked
    }

    fn duplicate_ack(&mut self, host: &mut dyn StreamHost, seg: &Segment) {
        self.dup_acks += 1;
        let lead: i32 = self.send_fack - self.send_una;
        if self.dup_acks > RXMIT_THRESH {
            if !self.sack {
                // Inflate the window by the segment that left the network.
                self.c_win = (self.c_win + self.mss).min(MAX_WINDOW);
            }
        } else if self.dup_acks == RXMIT_THRESH || (self.sack && RXMIT_THRESH * self.mss < lead) {
            if seg.ack < self.send_recover {
                // Still within the window of a previous recovery (RFC 6582).
                self.dup_acks = 0;
                return;
            }
            debug!("duplicate_ack(): fast retransmit at {}", self.send_una);
            self.cut_thresh();
            self.send_recover = self.send_max;
            self.fast_rxmit = true;
            self.partial_acked = false;
            self.rtt_timing = None;
            self.reset_rxmit_timer(host);
            if self.sack {
                self.dup_acks = RXMIT_THRESH;
                self.c_win = self.ss_thresh;
            } else {
                self.c_win = self.ss_thresh + RXMIT_THRESH * self.mss;
                self.c_acked = 0;
            }
        } else if self.dup_acks == LIMITED_THRESH || (self.sack && LIMITED_THRESH * self.mss < lead) {
            if seg.ack < self.send_recover {
                self.dup_acks = 0;
                return;
            }
            // Limited transmit (RFC 3042).
            self.dup_acks = LIMITED_THRESH;
        }
    }

    /// Grows the congestion window for `acked` newly acknowledged bytes.
    fn open_window(&mut self, acked: i32) {
        if self.dup_acks >= RXMIT_THRESH {
            if !self.sack {
                // Deflate by what left the network, add back one segment (RFC 6582).
                self.c_win = (self.c_win - acked).max(self.mss);
                if acked >= self.mss {
                    self.c_win += self.mss;
                }
            }
            return;
        }
        if self.c_win <= self.ss_thresh {
            self.c_win += acked.min(self.mss);
        } else {
            self.c_acked += acked;
            if self.c_win <= self.c_acked {
                self.c_acked -= self.c_win;
                self.c_win += self.mss;
            }
        }
        self.c_win = self.c_win.min(MAX_WINDOW);
    }

    fn set_send_window(&mut self, seg: &Segment) {
        self.send_win = seg.win;
        self.send_wl1 = seg.seq;
        self.send_wl2 = seg.ack;
        self.send_max_win = self.send_max_win.max(seg.win);
    }

    fn update_send_window(&mut self, seg: &Segment) {
        if self.send_wl1 < seg.seq
            || (self.send_wl1 == seg.seq && self.send_wl2 <= seg.ack)
            || (self.send_wl2 == seg.ack && self.send_win < seg.win)
        {
            self.set_send_window(seg);
        }
    }

    /// Enters or leaves persist mode after the send window changed.
    fn check_persist(&mut self, host: &mut dyn StreamHost, now: Instant) {
        if self.send_win == 0 && self.send_ring.get_used() > 0 {
            if !self.persist {
                self.persist = true;
                self.r0 = Some(now);
                self.reset_rxmit_timer(host);
            }
        } else {
            self.persist = false;
        }
    }

    fn urg(&mut self, seg: &Segment) {
        if !seg.has(TCP_URG) {
            return;
        }
        let up: SeqNumber = seg.seq + u32::from(seg.urg);
        if self.recv_up < up {
            self.recv_up = up;
        }
        self.have_urg = i32::from(seg.urg) <= seg.len;
    }

    /// Queues the payload of a segment. Returns false if the connection was aborted.
    fn text(&mut self, host: &mut dyn StreamHost, header: &TcpHeader, data: &[u8], seg: &mut Segment) -> bool {
        let fin: i32 = seg.has(TCP_FIN) as i32;
        let adv: i32 = seg.len - fin;
        if adv <= 0 {
            return true;
        }
        if self.shutrd {
            self.refuse_data(host, header, data.len());
            return false;
        }
        let end: usize = (seg.offset + adv as usize).min(data.len());
        let payload: &[u8] = &data[seg.offset.min(end)..end];

        if seg.seq == self.recv_next {
            if seg.has(TCP_PSH) {
                self.ack_now = true;
            }
            let count: usize = self.recv_ring.write_at(payload, 0, &mut self.asb);
            if count < payload.len() {
                // Ran out of ring; the peer resends the rest, FIN included.
                seg.flag &= !TCP_FIN;
                self.ack_now = true;
            } else if !self.asb.is_empty() || count > payload.len() {
                // Filled a gap: let the sender know right away.
                self.ack_now = true;
            }
            self.recv_next = self.recv_next + count as u32;
            self.recv_win = (self.recv_win - count as i32).max(0);
            if 2 * self.mss <= self.recv_next - self.recv_acked {
                self.ack_now = true;
            }
            host.signal(StreamSignal::Changed);
        } else {
            // Out of order: queue it past the tail and report it with a duplicate ACK.
            self.ack_now = true;
            let offset: i32 = seg.seq - self.recv_next;
            self.recv_ring.write_at(payload, offset as usize, &mut self.asb);
            if seg.has(TCP_FIN) {
                seg.flag &= !TCP_FIN;
                seg.len -= 1;
            }
        }
        true
    }
}
