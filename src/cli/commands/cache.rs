use clap::{Arg, Command};

pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("redis-url")
                .long("redis-url")
                .help("Redis URL for the refresh idempotency cache, optional")
                .long_help(
                    "Redis URL for the refresh idempotency cache. Without it, and whenever Redis is unreachable, every refresh is handled as a cache miss.",
                )
                .env("GARDISTO_REDIS_URL"),
        )
        .arg(
            Arg::new("idempotency-ttl-seconds")
                .long("idempotency-ttl-seconds")
                .help("TTL in seconds for cached refresh responses")
                .env("GARDISTO_IDEMPOTENCY_TTL_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64)),
        )
}
