// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::flexi_logger::Logger;
use ::std::sync::Once;

//======================================================================================================================
// Static Variables
//======================================================================================================================

/// Guardian to the logging initialize function.
static INIT_LOG: Once = Once::new();

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Initializes logging features. The log specification is read from `RUST_LOG` and falls back to `info`.
pub fn initialize() {
    INIT_LOG.call_once(|| {
        let logger: Logger = match Logger::try_with_env_or_str("info") {
            Ok(logger) => logger,
            Err(e) => {
                eprintln!("logging::initialize(): invalid log specification ({:?})", e);
                return;
            },
        };
        if let Err(e) = logger.start() {
            eprintln!("logging::initialize(): failed to start logger ({:?})", e);
        }
    });
}
