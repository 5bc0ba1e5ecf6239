use clap::{Arg, Command};

pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("token-ttl-seconds")
                .long("token-ttl-seconds")
                .help("Refresh token lifetime in seconds")
                .env("GARDISTO_TOKEN_TTL_SECONDS")
                .default_value("432000")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("token-min-remaining-seconds")
                .long("token-min-remaining-seconds")
                .help("Remaining life under which login rotates instead of reusing a token")
                .env("GARDISTO_TOKEN_MIN_REMAINING_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("token-retry-window-ms")
                .long("token-retry-window-ms")
                .help("Window in milliseconds treating a replayed rotation as a benign retry")
                .env("GARDISTO_TOKEN_RETRY_WINDOW_MS")
                .default_value("1000")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("token-sweep-interval-seconds")
                .long("token-sweep-interval-seconds")
                .help("Interval between sweeps deleting tokens past end of life")
                .env("GARDISTO_TOKEN_SWEEP_INTERVAL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(u64)),
        )
}
