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
use crate::{
    inetstack::protocols::tcp::constants::{
        MAX_BACKOFF,
        PERSIST_MAX,
        PMTUD_BACKOFF,
        R1,
        RTT_DEFAULT,
        RTT_MAX,
        RTT_MIN,
    },
    runtime::network::consts::DEFAULT_MSS,
};
use ::libc::ETIMEDOUT;
use ::std::time::{
    Duration,
    Instant,
};

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Stream {
    /// Handles the expiration of one of this stream's timers.
    pub fn on_timer(&mut self, host: &mut dyn StreamHost, timer: StreamTimer) {
        match timer {
            StreamTimer::Retransmit => {
                self.rxmit_timer = None;
                self.expired(host);
            },
            StreamTimer::DelayedAck => {
                self.ack_timer = None;
                if self.recv_acked < self.recv_next {
                    self.ack_now = true;
                    self.output(host);
                }
            },
        }
    }

    /// Retransmission timeout (RFC 6298). Doubles as the persist and the 2MSL timer.
    fn expired(&mut self, host: &mut dyn StreamHost) {
        match self.state {
            State::Closed | State::Listen => return,
            State::TimeWait => {
                self.abort(host);
                return;
            },
            _ => (),
        }

        self.rxmit_count = (self.rxmit_count + 1).min(MAX_BACKOFF);
        self.rto = (self.rto * 2).min(RTT_MAX);
        let now: Instant = host.now();
        let elapsed: Duration = now.saturating_duration_since(self.r0.unwrap_or(now));
        if !self.persist {
            if self.rxmit_count == PMTUD_BACKOFF && self.state.has_been_established() {
                // Black hole detection (RFC 2923): maybe the path drops our large segments.
                self.mss = self.mss.min(DEFAULT_MSS as i32);
            }
            if self.rxmit_count > R1 && self.r2 <= elapsed {
                self.err = if self.soft_err != 0 { self.soft_err } else { ETIMEDOUT };
                self.abort(host);
                return;
            }
        } else if PERSIST_MAX <= elapsed {
            self.err = ETIMEDOUT;
            self.abort(host);
            return;
        }
        debug!(
            "expired(): retransmitting from {} (count={:?}, rto={:?})",
            self.send_una, self.rxmit_count, self.rto
        );

        self.send_next = self.send_una;
        self.rtt_timing = None;
        self.cut_thresh();
        self.c_win = self.mss;
        self.dup_acks = 0;
        self.partial_acked = false;
        self.send_recover = self.send_max;
        self.scoreboard.clear();
        self.send_fack = self.send_una;
        self.rxmit_data = 0;
        self.send_awin = 0;
        self.output(host);
    }

    pub(super) fn init_rto(&mut self) {
        self.rxmit_count = 0;
        self.srtt = None;
        self.rtt_de = RTT_DEFAULT / 4;
        self.rto = RTT_DEFAULT;
    }

    /// Folds a round trip sample into the estimators.
    pub(super) fn update_rto(&mut self, rtt: Duration) {
        match self.srtt {
            None => {
                self.srtt = Some(rtt);
                self.rtt_de = rtt / 2;
            },
            Some(srtt) => {
                let err: i128 = rtt.as_micros() as i128 - srtt.as_micros() as i128;
                let srtt: i128 = srtt.as_micros() as i128 + err / 8;
                let rtt_de: i128 = self.rtt_de.as_micros() as i128;
                let rtt_de: i128 = rtt_de + (err.abs() - rtt_de) / 4;
                self.srtt = Some(Duration::from_micros(srtt.max(0) as u64));
                self.rtt_de = Duration::from_micros(rtt_de.max(0) as u64);
            },
        }
        self.rtt_timing = None;
        self.rxmit_count = 0;
        let srtt: Duration = self.srtt.unwrap_or(RTT_DEFAULT);
        self.rto = (srtt + 4 * self.rtt_de).clamp(RTT_MIN, RTT_MAX);
    }

    pub(super) fn start_rxmit_timer(&mut self, host: &mut dyn StreamHost) {
        if self.rxmit_timer.is_some() {
            return;
        }
        if self.rxmit_count == 0 {
            self.r0 = Some(host.now());
        }
        self.rxmit_timer = Some(host.schedule(StreamTimer::Retransmit, self.rto));
    }

    pub(super) fn stop_rxmit_timer(&mut self, host: &mut dyn StreamHost) {
        self.rxmit_count = 0;
        if let Some(id) = self.rxmit_timer.take() {
            host.cancel(id);
        }
    }

    pub(super) fn reset_rxmit_timer(&mut self, host: &mut dyn StreamHost) {
        if let Some(id) = self.rxmit_timer.take() {
            host.cancel(id);
        }
        self.rxmit_timer = Some(host.schedule(StreamTimer::Retransmit, self.rto));
    }

    pub(super) fn stop_ack_timer(&mut self, host: &mut dyn StreamHost) {
        if let Some(id) = self.ack_timer.take() {
            host.cancel(id);
        }
    }

    /// Halves the slow start threshold after a loss.
    pub(super) fn cut_thresh(&mut self) {
        self.ss_thresh = ((self.send_max - self.send_una) / 2).max(2 * self.mss);
    }

    pub fn get_rto(&self) -> Duration {
        self.rto
    }
}
