use clap::{Arg, Command};

pub fn with_args(command: Command) -> Command {
    let command = with_url_args(command);
    let command = with_session_args(command);
    with_guard_args(command)
}

fn with_url_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("base-url")
                .long("base-url")
                .help("Public base URL of this service, cookies are Secure when it is https")
                .env("GARDISTO_BASE_URL")
                .default_value("http://localhost:8080"),
        )
        .arg(
            Arg::new("frontend-base-url")
                .long("frontend-base-url")
                .help("Frontend base URL allowed as CORS origin")
                .env("GARDISTO_FRONTEND_BASE_URL")
                .default_value("http://localhost:5173"),
        )
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("session-key")
                .long("session-key")
                .help("URL-safe base64 key (32 bytes) sealing the session cookie")
                .long_help(
                    "URL-safe base64 key (32 bytes) sealing the session cookie. Without it an ephemeral key is generated and sessions do not survive a restart.",
                )
                .env("GARDISTO_SESSION_KEY"),
        )
        .arg(
            Arg::new("session-ttl-seconds")
                .long("session-ttl-seconds")
                .help("Session cookie TTL in seconds")
                .env("GARDISTO_SESSION_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64)),
        )
}

fn with_guard_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("lockout-threshold")
                .long("lockout-threshold")
                .help("Consecutive failed logins that deactivate an account")
                .env("GARDISTO_LOCKOUT_THRESHOLD")
                .default_value("5")
                .value_parser(clap::value_parser!(i32)),
        )
        .arg(
            Arg::new("rate-limit-per-minute")
                .long("rate-limit-per-minute")
                .help("Auth requests allowed per client per minute, 0 disables")
                .env("GARDISTO_RATE_LIMIT_PER_MINUTE")
                .default_value("30")
                .value_parser(clap::value_parser!(u32)),
        )
}
