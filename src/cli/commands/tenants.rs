use clap::{Arg, ArgMatches, Command};

use crate::tenants::{DEFAULT_CHANNEL, DEFAULT_REFRESH_DEADLINE, DEFAULT_STALENESS};

pub const ARG_TENANT_STALENESS_SECONDS: &str = "tenant-staleness-seconds";
pub const ARG_TENANT_REFRESH_DEADLINE_SECONDS: &str = "tenant-refresh-deadline-seconds";
pub const ARG_TENANT_CHANNEL: &str = "tenant-channel";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub staleness_seconds: u64,
    pub refresh_deadline_seconds: u64,
    pub channel: String,
}

impl Options {
    /// # Errors
    /// Returns an error if the channel name is empty.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let channel = matches
            .get_one::<String>(ARG_TENANT_CHANNEL)
            .map_or_else(|| DEFAULT_CHANNEL.to_string(), |value| value.trim().to_string());
        if channel.is_empty() {
            anyhow::bail!("--{ARG_TENANT_CHANNEL} must not be empty");
        }

        Ok(Self {
            staleness_seconds: matches
                .get_one::<u64>(ARG_TENANT_STALENESS_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_STALENESS.as_secs()),
            refresh_deadline_seconds: matches
                .get_one::<u64>(ARG_TENANT_REFRESH_DEADLINE_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_REFRESH_DEADLINE.as_secs()),
            channel,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TENANT_STALENESS_SECONDS)
                .long(ARG_TENANT_STALENESS_SECONDS)
                .help("Age after which a read of the tenant allow-list schedules a reload")
                .env("GATEHOUSE_TENANT_STALENESS_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_TENANT_REFRESH_DEADLINE_SECONDS)
                .long(ARG_TENANT_REFRESH_DEADLINE_SECONDS)
                .help("Deadline for one allow-list reload, in seconds")
                .env("GATEHOUSE_TENANT_REFRESH_DEADLINE_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_TENANT_CHANNEL)
                .long(ARG_TENANT_CHANNEL)
                .help("Pub/sub channel carrying tenant refresh signals")
                .env("GATEHOUSE_TENANT_CHANNEL")
                .default_value(DEFAULT_CHANNEL),
        )
}
