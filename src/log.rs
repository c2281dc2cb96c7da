// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Logging setup (`SPEC_FULL.md` §2.1): `log` facade wired to `log4rs`,
//! console output plus an optional rolling file appender.

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::config::{Appender, Config as LogConfig, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;

use crate::config::{self, LogLevel};
use crate::error::{Error, ErrorKind};

const LOG_FILE_SIZE: u64 = 16 * 1024 * 1024;
const ROLLER_PATTERN: &str = ".{}.gz";
const ROLLER_COUNT: u32 = 10;
const STDOUT_NAME: &str = "stdout";
const ROLLER_NAME: &str = "roller";

fn level_filter(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::Off => LevelFilter::Off,
        LogLevel::Error => LevelFilter::Error,
        LogLevel::Warn => LevelFilter::Warn,
        LogLevel::Info => LevelFilter::Info,
        LogLevel::Debug => LevelFilter::Debug,
        LogLevel::Trace => LevelFilter::Trace,
    }
}

/// Initializes the global logger from config. Safe to call at most once
/// per process; a second call returns `ConfigError`.
///
/// # Errors
/// Returns `ConfigError` if the rolling-file policy or `log4rs` handle
/// fails to build.
pub fn init_log(log_conf: &config::Log) -> Result<(), Error> {
    let level = level_filter(log_conf.log_level());

    let stdout = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{d} {h({l})} [{T}] - {m}{n}")))
        .build();

    let mut builder = LogConfig::builder().appender(Appender::builder().build(STDOUT_NAME, Box::new(stdout)));

    let mut root_appenders = vec![STDOUT_NAME.to_string()];

    if let Some(log_file) = log_conf.log_file() {
        let roller_pattern = format!("{log_file}{ROLLER_PATTERN}");
        let roller = FixedWindowRoller::builder().build(&roller_pattern, ROLLER_COUNT).map_err(|err| {
            Error::new(ErrorKind::ConfigError, format!("failed to build log roller: {err}"))
        })?;
        let policy = Box::new(CompoundPolicy::new(Box::new(SizeTrigger::new(LOG_FILE_SIZE)), Box::new(roller)));
        let appender = RollingFileAppender::builder().build(log_file, policy).map_err(|err| {
            Error::new(ErrorKind::ConfigError, format!("failed to build rolling file appender: {err}"))
        })?;
        builder = builder.appender(Appender::builder().build(ROLLER_NAME, Box::new(appender)));
        root_appenders.push(ROLLER_NAME.to_string());
    }

    if !log_conf.console_log() {
        root_appenders.retain(|name| name != STDOUT_NAME);
    }

    let log_config = builder
        .logger(Logger::builder().build("mqtt_broker_core", level))
        .build(Root::builder().appenders(root_appenders).build(level))
        .map_err(|err| Error::new(ErrorKind::ConfigError, format!("failed to build log4rs config: {err}")))?;

    log4rs::init_config(log_config)
        .map_err(|err| Error::new(ErrorKind::ConfigError, format!("failed to init log4rs: {err}")))?;
    Ok(())
}
