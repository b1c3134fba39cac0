// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The TCP control block: one connection's RFC 793 state machine with SACK, congestion control and the timers that
//! drive retransmission, persist and delayed ACKs.
//!
//! A [Stream] owns no I/O. Everything it needs from the stack (the clock, timers, the wire and waking up waiters) goes
//! through the [StreamHost] passed into each call, which keeps the state machine easy to drive from tests.

mod input;
mod output;
mod timer;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    collections::ring::{
        Ring,
        RingBlock,
    },
    inetstack::{
        conduit::messenger::Messenger,
        protocols::tcp::{
            constants::{
                DEF_SSTHRESH,
                R2_SYN,
            },
            header::{
                TcpHeader,
                MAX_SACK_BLOCKS,
                TCP_ACK,
                TCP_RST,
            },
            scoreboard::Scoreboard,
            SeqNumber,
        },
        SocketDesc,
    },
    runtime::{
        fail::Fail,
        network::{
            config::TcpConfig,
            consts::DEFAULT_MSS,
        },
        timer::TimerId,
    },
};
use ::arrayvec::ArrayVec;
use ::libc::{
    EAGAIN,
    EALREADY,
    ECONNABORTED,
    ECONNREFUSED,
    EINVAL,
    EISCONN,
    EMSGSIZE,
    ENOBUFS,
    ENOTCONN,
    EPIPE,
};
use ::std::{
    collections::VecDeque,
    net::SocketAddrV4,
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    LastAck,
    Closing,
    TimeWait,
}

/// Timers a control block runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamTimer {
    /// Retransmission, persist and 2MSL timer.
    Retransmit,
    DelayedAck,
}

/// Things a control block reports to the stack that owns it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamSignal {
    /// Readability, writability or the state changed; wake up waiters.
    Changed,
    /// The handshake completed.
    Established,
    /// The connection reached Closed and its conduit should be removed.
    Closed,
}

/// Services a control block needs from the stack.
pub trait StreamHost {
    fn now(&self) -> Instant;

    fn schedule(&mut self, timer: StreamTimer, delay: Duration) -> TimerId;

    fn cancel(&mut self, id: TimerId);

    /// Sends a segment. The messenger holds the TCP header and payload, with a zero checksum.
    fn transmit(&mut self, segment: Messenger);

    fn signal(&mut self, signal: StreamSignal);

    fn generate_isn(&self, local: &SocketAddrV4, remote: &SocketAddrV4) -> SeqNumber;
}

/// TCP connection control block.
pub struct Stream {
    state: State,
    config: TcpConfig,
    local: SocketAddrV4,
    remote: SocketAddrV4,

    recv_ring: Ring,
    send_ring: Ring,
    /// Above sequence blocks: out-of-order data queued past the receive ring's tail, most recent last.
    asb: ArrayVec<RingBlock, MAX_SACK_BLOCKS>,
    err: i32,
    /// Last soft error (e.g. network unreachable). Reported if the connection times out.
    soft_err: i32,

    /// Maximum segment size, possibly reduced by path MTU discovery.
    mss: i32,
    persist: bool,
    nagle: bool,
    shutrd: bool,
    shutwr: bool,
    have_urg: bool,
    ack_now: bool,
    fast_rxmit: bool,
    /// A partial ACK arrived during the current recovery.
    partial_acked: bool,
    sack: bool,

    // Send sequence variables.
    send_una: SeqNumber,
    send_next: SeqNumber,
    send_up: SeqNumber,
    send_wl1: SeqNumber,
    send_wl2: SeqNumber,
    iss: SeqNumber,
    /// Largest send window offered so far (RFC 1122 Max(SND.WND)).
    send_max_win: i32,
    send_max: SeqNumber,
    /// Forward-most data the peer holds (FACK).
    send_fack: SeqNumber,
    send_win: i32,
    /// Estimate of the data in flight: `send_max - send_fack + rxmit_data`.
    send_awin: i32,

    // Receive sequence variables.
    recv_next: SeqNumber,
    recv_win: i32,
    recv_up: SeqNumber,
    irs: SeqNumber,
    recv_acked: SeqNumber,
    dup_acks: i32,

    // Slow start and congestion avoidance.
    c_win: i32,
    ss_thresh: i32,
    c_acked: i32,

    // Round trip timing.
    rtt_timing: Option<Instant>,
    rtt_seq: SeqNumber,
    srtt: Option<Duration>,
    rtt_de: Duration,

    // Retransmission.
    rxmit_count: u32,
    rto: Duration,
    r0: Option<Instant>,
    r2: Duration,
    rxmit_timer: Option<TimerId>,
    rxmit_data: i32,

    ack_timer: Option<TimerId>,

    // SACK recovery.
    scoreboard: Scoreboard,
    send_recover: SeqNumber,
    onxt: SeqNumber,
    hole: Option<usize>,

    // Listen.
    backlog: usize,
    half_open: usize,
    accepted: VecDeque<SocketDesc>,
}

/// Fields of an arriving segment the state machine works on. Trimming to the receive window rewrites them.
#[derive(Clone, Copy, Debug)]
struct Segment {
    flag: u16,
    seq: SeqNumber,
    ack: SeqNumber,
    urg: u16,
    win: i32,
    /// Sequence space length: data bytes plus one each for SYN and FIN.
    len: i32,
    /// First payload byte still to be consumed.
    offset: usize,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl State {
    /// Has a SYN been exchanged in both directions at some point?
    pub fn has_been_established(&self) -> bool {
        !matches!(self, State::Closed | State::Listen | State::SynSent | State::SynReceived)
    }
}

impl Stream {
    pub fn new(config: &TcpConfig) -> Self {
        let mss: i32 = DEFAULT_MSS as i32;
        let zero: SeqNumber = SeqNumber::from(0);
        let unspecified: SocketAddrV4 = SocketAddrV4::new(::std::net::Ipv4Addr::UNSPECIFIED, 0);
        let recv_ring: Ring = Ring::new(config.get_receive_buffer_size());
        let recv_win: i32 = recv_ring.get_size() as i32;
        let mut stream: Stream = Self {
            state: State::Closed,
            config: config.clone(),
            local: unspecified,
            remote: unspecified,
            recv_ring,
            send_ring: Ring::new(config.get_send_buffer_size()),
            asb: ArrayVec::new(),
            err: 0,
            soft_err: 0,
            mss,
            persist: false,
            nagle: true,
            shutrd: false,
            shutwr: false,
            have_urg: false,
            ack_now: false,
            fast_rxmit: false,
            partial_acked: false,
            sack: false,
            send_una: zero,
            send_next: zero,
            send_up: zero,
            send_wl1: zero,
            send_wl2: zero,
            iss: zero,
            send_max_win: 0,
            send_max: zero,
            send_fack: zero,
            send_win: mss,
            send_awin: 0,
            recv_next: zero,
            recv_win,
            recv_up: zero,
            irs: zero,
            recv_acked: zero,
            dup_acks: 0,
            c_win: 2 * mss,
            ss_thresh: DEF_SSTHRESH,
            c_acked: 0,
            rtt_timing: None,
            rtt_seq: zero,
            srtt: None,
            rtt_de: Duration::ZERO,
            rxmit_count: 0,
            rto: Duration::ZERO,
            r0: None,
            r2: R2_SYN,
            rxmit_timer: None,
            rxmit_data: 0,
            ack_timer: None,
            scoreboard: Scoreboard::new(zero),
            send_recover: zero,
            onxt: zero,
            hole: None,
            backlog: config.get_backlog(),
            half_open: 0,
            accepted: VecDeque::new(),
        };
        stream.init_rto();
        stream
    }

    pub fn get_state(&self) -> State {
        self.state
    }

    pub fn get_local(&self) -> SocketAddrV4 {
        self.local
    }

    pub fn get_remote(&self) -> SocketAddrV4 {
        self.remote
    }

    pub fn get_mss(&self) -> usize {
        self.mss as usize
    }

    pub fn get_congestion_window(&self) -> usize {
        self.c_win as usize
    }

    pub fn get_slow_start_threshold(&self) -> usize {
        self.ss_thresh as usize
    }

    pub fn get_send_unacked(&self) -> SeqNumber {
        self.send_una
    }

    pub fn get_send_next(&self) -> SeqNumber {
        self.send_next
    }

    pub fn get_receive_next(&self) -> SeqNumber {
        self.recv_next
    }

    /// Window we last advertised.
    pub fn get_receive_window(&self) -> usize {
        self.recv_win as usize
    }

    pub fn is_sack_permitted(&self) -> bool {
        self.sack
    }

    pub fn is_persisting(&self) -> bool {
        self.persist
    }

    /// Pending connection error, if any.
    pub fn get_error(&self) -> Option<Fail> {
        match self.err {
            0 => None,
            errno => Some(Fail::new(errno, "connection failed")),
        }
    }

    /// Offset of the urgent mark within the readable data, while urgent data is pending.
    pub fn get_urgent_offset(&self) -> Option<usize> {
        if !self.have_urg {
            return None;
        }
        let head: SeqNumber = self.recv_next - self.recv_ring.get_used() as u32;
        match self.recv_up - head {
            offset if offset >= 0 => Some(offset as usize),
            _ => None,
        }
    }

    pub fn is_readable(&self) -> bool {
        self.recv_ring.get_used() > 0 || self.shutrd || self.err != 0 || !self.accepted.is_empty()
    }

    pub fn is_writable(&self) -> bool {
        self.err != 0 || self.shutwr || (self.is_connected() && self.send_ring.get_unused() > 0)
    }

    /// Can data flow in at least one direction?
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            State::Established | State::FinWait1 | State::FinWait2 | State::CloseWait
        )
    }

    pub fn is_shutdown_input(&self) -> bool {
        self.shutrd
    }

    pub fn is_shutdown_output(&self) -> bool {
        self.shutwr
    }

    fn set_state(&mut self, host: &mut dyn StreamHost, state: State) {
        if self.state == state {
            return;
        }
        debug!("set_state(): {:?} -> {:?} ({:?} -> {:?})", self.state, state, self.local, self.remote);
        self.state = state;
        match state {
            State::Established => self.r2 = super::constants::R2,
            State::CloseWait | State::Closing => {
                self.shutrd = true;
                host.signal(StreamSignal::Changed);
            },
            State::TimeWait => {
                self.stop_rxmit_timer(host);
                self.stop_ack_timer(host);
                self.shutrd = true;
                self.rto = 2 * super::constants::MSL;
                self.start_rxmit_timer(host);
                host.signal(StreamSignal::Changed);
            },
            _ => (),
        }
    }

    /// Opens a connection (active open). Completion is reported through [StreamSignal::Established].
    pub fn connect(
        &mut self,
        host: &mut dyn StreamHost,
        local: SocketAddrV4,
        remote: SocketAddrV4,
        mss: usize,
    ) -> Result<(), Fail> {
        match self.state {
            State::Closed if self.err != 0 => return Err(Fail::new(self.err, "connection failed")),
            State::Closed => (),
            State::SynSent | State::SynReceived => return Err(Fail::new(EALREADY, "connection already in progress")),
            State::Listen => return Err(Fail::new(EINVAL, "socket is listening")),
            _ => return Err(Fail::new(EISCONN, "socket is already connected")),
        }
        self.local = local;
        self.remote = remote;
        self.mss = mss as i32;
        self.c_win = 2 * self.mss;
        self.send_win = self.mss;
        self.init_rto();
        self.iss = host.generate_isn(&local, &remote);
        self.send_una = self.iss;
        self.send_next = self.iss;
        self.send_max = self.iss;
        self.send_up = self.iss;
        self.send_fack = self.iss;
        self.rxmit_data = 0;
        self.send_awin = 0;
        self.send_recover = self.iss;
        self.scoreboard.reset(self.iss);
        self.r2 = R2_SYN;
        self.set_state(host, State::SynSent);
        self.output(host);
        Ok(())
    }

    /// Starts accepting connections on `local`.
    pub fn listen(&mut self, local: SocketAddrV4, backlog: Option<usize>) -> Result<(), Fail> {
        match self.state {
            State::Closed => (),
            State::Listen => (),
            _ => return Err(Fail::new(EISCONN, "socket is already connected")),
        }
        self.local = local;
        if let Some(backlog) = backlog {
            self.backlog = backlog.max(1);
        }
        self.state = State::Listen;
        Ok(())
    }

    /// Handles a segment that reached a listening stream. A valid SYN yields the control block of a new half-open
    /// connection in SynReceived; the segment must then be fed to it with [Self::input].
    pub fn spawn(
        &mut self,
        host: &mut dyn StreamHost,
        header: &TcpHeader,
        data: &[u8],
        local: SocketAddrV4,
        remote: SocketAddrV4,
        mss: usize,
    ) -> Option<Stream> {
        debug_assert_eq!(self.state, State::Listen);
        if header.rst {
            return None;
        }
        if header.ack {
            host.transmit_reset(header, data.len(), local, remote);
            return None;
        }
        if !header.syn {
            return None;
        }
        if self.half_open + self.accepted.len() >= self.backlog {
            warn!("spawn(): backlog full, dropping SYN from {:?}", remote);
            return None;
        }

        // The child inherits the buffer sizes of the listener.
        let mut accepted: Stream = Stream::new(&self.config);
        accepted.recv_ring = Ring::new(self.recv_ring.get_size());
        accepted.send_ring = Ring::new(self.send_ring.get_size());
        accepted.recv_win = accepted.recv_ring.get_size() as i32;
        accepted.local = local;
        accepted.remote = remote;
        accepted.mss = mss as i32;
        accepted.c_win = 2 * accepted.mss;
        accepted.ss_thresh = DEF_SSTHRESH;
        accepted.iss = host.generate_isn(&local, &remote);
        accepted.irs = header.seq_num;
        accepted.recv_acked = header.seq_num;
        // Just for the SYN. The segment is trimmed later.
        accepted.recv_next = header.seq_num + 1;
        accepted.recv_up = accepted.recv_next;
        accepted.send_una = accepted.iss;
        accepted.send_next = accepted.iss;
        accepted.send_max = accepted.iss;
        accepted.send_up = accepted.iss;
        accepted.send_fack = accepted.iss;
        accepted.send_recover = accepted.iss;
        accepted.scoreboard.reset(accepted.iss);
        accepted.rxmit_data = 0;
        accepted.send_awin = 0;
        if !accepted.option(header) {
            return None;
        }
        self.half_open += 1;
        accepted.state = State::SynReceived;
        debug!("spawn(): Listen -> SynReceived ({:?} -> {:?})", local, remote);
        Some(accepted)
    }

    /// A child spawned by this listener completed its handshake.
    pub fn child_established(&mut self, child: SocketDesc) {
        self.half_open = self.half_open.saturating_sub(1);
        self.accepted.push_back(child);
    }

    /// A child spawned by this listener was aborted before completing its handshake.
    pub fn child_aborted(&mut self) {
        self.half_open = self.half_open.saturating_sub(1);
    }

    /// Dequeues an established connection.
    pub fn accept(&mut self) -> Result<SocketDesc, Fail> {
        if self.state != State::Listen {
            return Err(Fail::new(EINVAL, "socket is not listening"));
        }
        self.accepted
            .pop_front()
            .ok_or_else(|| Fail::new(EAGAIN, "no connection to accept"))
    }

    /// Connections established but never accepted.
    pub fn take_accepted(&mut self) -> Vec<SocketDesc> {
        self.accepted.drain(..).collect()
    }

    /// Copies received data out of the receive ring. Zero means end of stream.
    pub fn read(&mut self, host: &mut dyn StreamHost, buf: &mut [u8]) -> Result<usize, Fail> {
        let used: usize = self.recv_ring.get_used();
        if used == 0 {
            if self.err != 0 {
                return Err(Fail::new(self.err, "connection failed"));
            }
            if self.shutrd {
                return Ok(0);
            }
            if matches!(self.state, State::Closed | State::Listen) {
                return Err(Fail::new(ENOTCONN, "socket is not connected"));
            }
            return Err(Fail::new(EAGAIN, "no data available"));
        }
        let count: usize = self.recv_ring.read(buf);
        if self.have_urg && !(self.recv_next - self.recv_ring.get_used() as u32 <= self.recv_up) {
            // Read past the urgent mark.
            self.have_urg = false;
        }
        // Let the peer know about the space just freed.
        self.output(host);
        Ok(count)
    }

    /// Queues data on the send ring. Returns how much fit.
    pub fn write(&mut self, host: &mut dyn StreamHost, data: &[u8]) -> Result<usize, Fail> {
        let count: usize = self.queue(data)?;
        self.output(host);
        Ok(count)
    }

    /// Like [Self::write], and marks the end of the queued data as urgent.
    pub fn write_urgent(&mut self, host: &mut dyn StreamHost, data: &[u8]) -> Result<usize, Fail> {
        let count: usize = self.queue(data)?;
        // The mark has to be in place before the data goes out.
        self.send_up = self.send_una + self.send_ring.get_used() as u32;
        self.output(host);
        Ok(count)
    }

    fn queue(&mut self, data: &[u8]) -> Result<usize, Fail> {
        if self.err != 0 {
            return Err(Fail::new(self.err, "connection failed"));
        }
        if self.shutwr {
            return Err(Fail::new(EPIPE, "socket is shut down for writing"));
        }
        if matches!(self.state, State::Closed | State::Listen) {
            return Err(Fail::new(ENOTCONN, "socket is not connected"));
        }
        if self.send_ring.get_unused() == 0 {
            return Err(Fail::new(EAGAIN, "send buffer full"));
        }
        Ok(self.send_ring.write(data))
    }

    /// Disables the Nagle algorithm.
    pub fn set_nodelay(&mut self, nodelay: bool) {
        self.nagle = !nodelay;
    }

    /// Closes both directions. A FIN follows the queued data.
    pub fn close(&mut self, host: &mut dyn StreamHost) {
        self.shutrd = true;
        self.shutwr = true;
        if self.close_state(host) {
            self.output(host);
        }
        host.signal(StreamSignal::Changed);
    }

    pub fn shutdown_output(&mut self, host: &mut dyn StreamHost) -> Result<(), Fail> {
        if matches!(self.state, State::Closed) {
            return Err(Fail::new(ENOTCONN, "socket is not connected"));
        }
        self.shutwr = true;
        if self.close_state(host) {
            self.output(host);
        }
        host.signal(StreamSignal::Changed);
        Ok(())
    }

    /// Stops delivering data. New data from the peer is answered with a reset.
    pub fn shutdown_input(&mut self, host: &mut dyn StreamHost) -> Result<(), Fail> {
        if matches!(self.state, State::Closed | State::Listen) {
            return Err(Fail::new(ENOTCONN, "socket is not connected"));
        }
        self.shutrd = true;
        host.signal(StreamSignal::Changed);
        Ok(())
    }

    /// The close transition of the current state. Returns true if a segment (e.g. a FIN) may be due.
    fn close_state(&mut self, host: &mut dyn StreamHost) -> bool {
        match self.state {
            State::Listen | State::SynSent => {
                self.abort(host);
                false
            },
            // The SYN still has to go out before the FIN; output moves on to FinWait1.
            State::SynReceived => true,
            State::Established => {
                self.set_state(host, State::FinWait1);
                true
            },
            State::CloseWait => {
                self.set_state(host, State::LastAck);
                true
            },
            _ => false,
        }
    }

    /// Tears the connection down without a FIN.
    pub fn abort(&mut self, host: &mut dyn StreamHost) {
        if self.err != 0 {
            warn!("abort(): {:?} -> {:?} errno={:?}", self.local, self.remote, self.err);
        }
        self.set_state(host, State::Closed);
        self.stop_rxmit_timer(host);
        self.stop_ack_timer(host);
        host.signal(StreamSignal::Changed);
        host.signal(StreamSignal::Closed);
    }

    /// Tears the connection down, telling the peer with a reset if it is synchronized.
    pub fn abort_with_reset(&mut self, host: &mut dyn StreamHost) {
        if self.state.has_been_established() || self.state == State::SynReceived {
            let mut rst: TcpHeader = TcpHeader::new(self.local.port(), self.remote.port());
            rst.seq_num = self.send_next;
            rst.ack_num = self.recv_next;
            rst.set_flags(TCP_RST | TCP_ACK);
            host.transmit(output::build_segment(&rst, &[], self.local, self.remote));
        }
        self.abort(host);
    }

    /// An ICMP error about this connection arrived.
    pub fn error(&mut self, host: &mut dyn StreamHost, errno: i32) {
        match errno {
            ECONNREFUSED => {
                if matches!(self.state, State::Closed | State::Listen) {
                    return;
                }
                self.err = errno;
                self.abort(host);
            },
            ENOBUFS => {
                // Source quench: back to slow start.
                self.c_win = self.mss;
            },
            EMSGSIZE => {
                // The MSS has been lowered through set_path_mtu(); resend what is outstanding in smaller pieces.
                self.send_next = self.send_una;
                self.output(host);
            },
            _ => {
                if self.state == State::SynSent {
                    self.err = errno;
                    self.abort(host);
                } else {
                    self.soft_err = errno;
                }
            },
        }
    }

    /// Clamps the MSS to what a path MTU of `mtu` bytes leaves for payload.
    pub fn set_path_mtu(&mut self, mtu: usize) {
        let mss: i32 = mtu.saturating_sub(40).max(8) as i32;
        if mss < self.mss {
            debug!("set_path_mtu(): mss {:?} -> {:?}", self.mss, mss);
            self.mss = mss;
        }
    }

    pub fn set_receive_buffer_size(&mut self, size: usize) -> Result<(), Fail> {
        let idle: bool = matches!(self.state, State::Closed | State::Listen);
        if !idle && size < self.recv_ring.get_size() {
            return Err(Fail::new(EINVAL, "cannot shrink the receive buffer of a connected stream"));
        }
        let size: usize = size.min(super::constants::MAX_WINDOW as usize);
        if !self.recv_ring.resize(size) {
            return Err(Fail::new(EINVAL, "receive buffer too small"));
        }
        self.asb.clear();
        if idle {
            self.recv_win = self.recv_ring.get_size() as i32;
        }
        Ok(())
    }

    pub fn set_send_buffer_size(&mut self, size: usize) -> Result<(), Fail> {
        if !self.send_ring.resize(size) {
            return Err(Fail::new(EINVAL, "send buffer too small"));
        }
        Ok(())
    }

    /// Answers data arriving after [Self::shutdown_input].
    fn refuse_data(&mut self, host: &mut dyn StreamHost, header: &TcpHeader, data_len: usize) {
        self.err = ECONNABORTED;
        host.transmit_reset(header, data_len, self.local, self.remote);
        self.abort(host);
    }
}

impl dyn StreamHost + '_ {
    /// Sends the reset answering `header`, unless it carries a reset itself.
    pub fn transmit_reset(&mut self, header: &TcpHeader, data_len: usize, local: SocketAddrV4, remote: SocketAddrV4) {
        if let Some(rst) = reset_for(header, data_len, local, remote) {
            self.transmit(rst);
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Builds the reset that answers `header` (RFC 793 page 36): <SEQ=SEG.ACK><CTL=RST> if it carried an ACK, else
/// <SEQ=0><ACK=SEG.SEQ+SEG.LEN><CTL=RST,ACK>. Returns none for a reset.
pub fn reset_for(header: &TcpHeader, data_len: usize, local: SocketAddrV4, remote: SocketAddrV4) -> Option<Messenger> {
    if header.rst {
        return None;
    }
    let mut len: u32 = data_len as u32;
    if header.syn {
        len += 1;
    }
    if header.fin {
        len += 1;
    }
    let mut rst: TcpHeader = TcpHeader::new(local.port(), remote.port());
    if header.ack {
        rst.seq_num = header.ack_num;
        rst.set_flags(TCP_RST);
    } else {
        rst.ack_num = header.seq_num + len;
        rst.set_flags(TCP_RST | TCP_ACK);
    }
    Some(output::build_segment(&rst, &[], local, remote))
}
