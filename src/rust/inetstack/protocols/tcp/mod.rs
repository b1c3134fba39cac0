// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod constants;
pub mod header;
mod isn_generator;
pub mod scoreboard;
mod sequence_number;
pub mod stream;


//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    header::{
        TcpHeader,
        TcpOption,
        MAX_TCP_HEADER_SIZE,
        MIN_TCP_HEADER_SIZE,
    },
    isn_generator::IsnGenerator,
    sequence_number::SeqNumber,
    stream::{
        reset_for,
        State,
        Stream,
        StreamHost,
        StreamSignal,
        StreamTimer,
    },
};
