// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

#[macro_use]
extern crate log;

pub mod collections;
pub mod inetstack;
pub mod runtime;

pub use self::{
    inetstack::{
        InetStack,
        SharedInetStack,
        SocketDesc,
        SocketType,
    },
    runtime::{
        fail::Fail,
        network::{
            channel::ChannelInterface,
            config::{
                InetConfig,
                StackConfig,
                TcpConfig,
            },
            types::MacAddress,
            NetworkInterface,
        },
    },
};

/// Ensures that two expressions are equal, returning an [anyhow::Error] otherwise.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr) => ({
        match (&$left, &$right) {
            (left_val, right_val) => {
                if !(*left_val == *right_val) {
                    anyhow::bail!(r#"ensure failed: `(left == right)` left: `{:?}`, right: `{:?}`"#, left_val, right_val)
                }
            }
        }
    });
}

/// Ensures that two expressions are not equal, returning an [anyhow::Error] otherwise.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr) => ({
        match (&$left, &$right) {
            (left_val, right_val) => {
                if *left_val == *right_val {
                    anyhow::bail!(r#"ensure failed: `(left != right)` left: `{:?}`, right: `{:?}`"#, left_val, right_val)
                }
            }
        }
    });
}
