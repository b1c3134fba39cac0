// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::network::consts::{
    DEFAULT_MSS,
    MAX_MSS,
    MIN_MSS,
};
use ::std::time::Duration;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Default size of the send and receive rings of a stream.
const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Smallest ring a stream may be configured with.
const MIN_BUFFER_SIZE: usize = 2 * MAX_MSS / 64;

//======================================================================================================================
// Structures
//======================================================================================================================

/// TCP Configuration Descriptor
#[derive(Clone, Debug)]
pub struct TcpConfig {
    /// Advertised Maximum Segment Size
    advertised_mss: usize,
    /// Size of the Receive Ring
    receive_buffer_size: usize,
    /// Size of the Send Ring
    send_buffer_size: usize,
    /// Timeout for Delayed ACKs
    ack_delay_timeout: Duration,
    /// Offer and Honor Selective Acknowledgements?
    sack_enabled: bool,
    /// Default Backlog for Listening Streams
    backlog: usize,
    /// Offload Checksum to Hardware When Receiving?
    rx_checksum_offload: bool,
    /// Offload Checksum to Hardware When Sending?
    tx_checksum_offload: bool,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// Associate Functions for TCP Configuration Descriptor
impl TcpConfig {
    /// Creates a TCP Configuration Descriptor.
    pub fn new(
        advertised_mss: Option<usize>,
        receive_buffer_size: Option<usize>,
        send_buffer_size: Option<usize>,
        ack_delay_timeout: Option<Duration>,
        sack_enabled: Option<bool>,
        backlog: Option<usize>,
        rx_checksum_offload: Option<bool>,
        tx_checksum_offload: Option<bool>,
    ) -> Self {
        let mut options = Self::default();

        if let Some(value) = advertised_mss {
            options = options.set_advertised_mss(value);
        }
        if let Some(value) = receive_buffer_size {
            options = options.set_receive_buffer_size(value);
        }
        if let Some(value) = send_buffer_size {
            options = options.set_send_buffer_size(value);
        }
        if let Some(value) = ack_delay_timeout {
            options.ack_delay_timeout = value;
        }
        if let Some(value) = sack_enabled {
            options.sack_enabled = value;
        }
        if let Some(value) = backlog {
            options.backlog = value.max(1);
        }
        if let Some(value) = rx_checksum_offload {
            options.rx_checksum_offload = value;
        }
        if let Some(value) = tx_checksum_offload {
            options.tx_checksum_offload = value;
        }

        options
    }

    /// Gets the advertised maximum segment size in the target [TcpConfig].
    pub fn get_advertised_mss(&self) -> usize {
        self.advertised_mss
    }

    /// Gets the size of the receive ring in the target [TcpConfig].
    pub fn get_receive_buffer_size(&self) -> usize {
        self.receive_buffer_size
    }

    /// Gets the size of the send ring in the target [TcpConfig].
    pub fn get_send_buffer_size(&self) -> usize {
        self.send_buffer_size
    }

    /// Gets the acknowledgement delay timeout in the target [TcpConfig].
    pub fn get_ack_delay_timeout(&self) -> Duration {
        self.ack_delay_timeout
    }

    /// Gets whether selective acknowledgements are offered in the target [TcpConfig].
    pub fn get_sack_enabled(&self) -> bool {
        self.sack_enabled
    }

    /// Gets the default backlog in the target [TcpConfig].
    pub fn get_backlog(&self) -> usize {
        self.backlog
    }

    /// Gets the RX hardware checksum offload option in the target [TcpConfig].
    pub fn get_rx_checksum_offload(&self) -> bool {
        self.rx_checksum_offload
    }

    /// Gets the TX hardware checksum offload option in the target [TcpConfig].
    pub fn get_tx_checksum_offload(&self) -> bool {
        self.tx_checksum_offload
    }

    /// Sets the advertised maximum segment size in the target [TcpConfig].
    fn set_advertised_mss(mut self, advertised_mss: usize) -> Self {
        assert!(advertised_mss >= MIN_MSS);
        assert!(advertised_mss <= MAX_MSS);
        self.advertised_mss = advertised_mss;
        self
    }

    /// Sets the size of the receive ring in the target [TcpConfig].
    fn set_receive_buffer_size(mut self, size: usize) -> Self {
        self.receive_buffer_size = size.clamp(MIN_BUFFER_SIZE, MAX_MSS);
        self
    }

    /// Sets the size of the send ring in the target [TcpConfig].
    fn set_send_buffer_size(mut self, size: usize) -> Self {
        self.send_buffer_size = size.max(MIN_BUFFER_SIZE);
        self
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Default Trait Implementation for TCP Configuration Descriptor
impl Default for TcpConfig {
    /// Creates a TCP Configuration Descriptor with the default values.
    fn default() -> Self {
        TcpConfig {
            advertised_mss: DEFAULT_MSS,
            receive_buffer_size: DEFAULT_BUFFER_SIZE,
            send_buffer_size: DEFAULT_BUFFER_SIZE,
            ack_delay_timeout: Duration::from_millis(200),
            sack_enabled: true,
            backlog: 5,
            rx_checksum_offload: false,
            tx_checksum_offload: false,
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
