// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod inet;
mod tcp;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    inet::InetConfig,
    tcp::TcpConfig,
};

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::libc::EINVAL;
use ::std::time::Duration;
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Configuration of a whole stack.
#[derive(Clone, Debug, Default)]
pub struct StackConfig {
    pub inet: InetConfig,
    pub tcp: TcpConfig,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl StackConfig {
    /// Loads a configuration from a YAML document. Missing keys keep their default value.
    ///
    /// ```yaml
    /// inet:
    ///   ttl: 64
    ///   reassembly_timeout_secs: 60
    /// tcp:
    ///   mss: 1460
    ///   receive_buffer_size: 8192
    ///   sack: true
    /// ```
    pub fn from_yaml_str(text: &str) -> Result<Self, Fail> {
        let docs: Vec<Yaml> = match YamlLoader::load_from_str(text) {
            Ok(docs) => docs,
            Err(e) => {
                let cause: String = format!("malformed configuration: {}", e);
                error!("from_yaml_str(): {}", cause);
                return Err(Fail::new(EINVAL, &cause));
            },
        };
        let doc: &Yaml = match docs.first() {
            Some(doc) => doc,
            None => return Ok(Self::default()),
        };

        let inet: &Yaml = &doc["inet"];
        let mut inet_config: InetConfig = InetConfig::new(
            get_u64(inet, "ttl")?.map(|v| v.min(u8::MAX as u64) as u8),
            get_u64(inet, "reassembly_timeout_secs")?.map(Duration::from_secs),
            get_u64(inet, "resolution_retries")?.map(|v| v as usize),
            get_u64(inet, "resolution_interval_ms")?.map(Duration::from_millis),
            get_u64(inet, "reachable_time_secs")?.map(Duration::from_secs),
        );
        if let Some(count) = get_u64(inet, "conflict_checks")? {
            inet_config = inet_config.set_conflict_checks(count as usize);
        }

        let tcp: &Yaml = &doc["tcp"];
        let tcp: TcpConfig = TcpConfig::new(
            get_u64(tcp, "mss")?.map(|v| v as usize),
            get_u64(tcp, "receive_buffer_size")?.map(|v| v as usize),
            get_u64(tcp, "send_buffer_size")?.map(|v| v as usize),
            get_u64(tcp, "ack_delay_ms")?.map(Duration::from_millis),
            get_bool(tcp, "sack")?,
            get_u64(tcp, "backlog")?.map(|v| v as usize),
            get_bool(tcp, "rx_checksum_offload")?,
            get_bool(tcp, "tx_checksum_offload")?,
        );

        Ok(Self {
            inet: inet_config,
            tcp,
        })
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

fn get_u64(section: &Yaml, key: &str) -> Result<Option<u64>, Fail> {
    match &section[key] {
        Yaml::BadValue | Yaml::Null => Ok(None),
        Yaml::Integer(value) if *value >= 0 => Ok(Some(*value as u64)),
        value => {
            let cause: String = format!("invalid value for {:?} (value={:?})", key, value);
            error!("get_u64(): {}", cause);
            Err(Fail::new(EINVAL, &cause))
        },
    }
}

fn get_bool(section: &Yaml, key: &str) -> Result<Option<bool>, Fail> {
    match &section[key] {
        Yaml::BadValue | Yaml::Null => Ok(None),
        Yaml::Boolean(value) => Ok(Some(*value)),
        value => {
            let cause: String = format!("invalid value for {:?} (value={:?})", key, value);
            error!("get_bool(): {}", cause);
            Err(Fail::new(EINVAL, &cause))
        },
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
