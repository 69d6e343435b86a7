//! `-v` verbosity, also settable by count or level name through
//! `GATEHOUSE_LOG_LEVEL`.

use clap::{builder::ValueParser, Arg, ArgAction, Command};

pub const ARG_VERBOSITY: &str = "verbosity";
pub const ENV_LOG_LEVEL: &str = "GATEHOUSE_LOG_LEVEL";

const MAX_VERBOSITY: u8 = 5;

/// Index is the verbosity count the name stands for.
const LEVEL_NAMES: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

fn parse_level(raw: &str) -> Result<u8, String> {
    let raw = raw.trim();
    if let Ok(count) = raw.parse::<u8>() {
        return if count <= MAX_VERBOSITY {
            Ok(count)
        } else {
            Err(format!("verbosity must be at most {MAX_VERBOSITY}, got {count}"))
        };
    }

    LEVEL_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(raw))
        .and_then(|index| u8::try_from(index).ok())
        .ok_or_else(|| {
            format!(
                "unknown log level {raw:?}, expected a count or one of {}",
                LEVEL_NAMES.join(", ")
            )
        })
}

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(parse_level)
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Repeat for more detail: -v warn, -vv info, -vvv debug, -vvvv trace")
            .env(ENV_LOG_LEVEL)
            .global(true)
            .action(ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}
