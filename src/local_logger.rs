use std::env;

use simplelog::{CombinedLogger, ConfigBuilder, SharedLogger};

use crate::prelude::*;

pub fn get_local_logger() -> Box<dyn SharedLogger> {
    let log_level = env::var("RESOLVER_LOG")
        .ok()
        .and_then(|log_level| log_level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);

    let config = ConfigBuilder::new()
        .set_time_level(log::LevelFilter::Debug)
        .build();

    simplelog::TermLogger::new(
        log_level,
        config,
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )
}

pub fn init_local_logger() -> Result<()> {
    CombinedLogger::init(vec![get_local_logger()])?;
    Ok(())
}
