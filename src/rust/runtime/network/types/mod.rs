// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod macaddr;

pub use self::macaddr::MacAddress;
