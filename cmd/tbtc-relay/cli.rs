use clap::Parser as ClapParser;
use tracing::Level;

pub const VERSION_STRING: &str = env!("CARGO_PKG_VERSION");

#[derive(ClapParser)]
#[command(
    name = "tbtc-relay",
    version = VERSION_STRING,
    about = "Cross-chain tBTC relayer"
)]
pub struct CLI {
    #[command(flatten)]
    pub opts: Options,
}

#[derive(ClapParser)]
pub struct Options {
    #[arg(
        long = "log.level",
        default_value_t = Level::INFO,
        value_name = "LOG_LEVEL",
        help = "Possible values: info, debug, trace, warn, error",
        long_help = "The verbosity level used for logs. Respects RUST_LOG when set.",
        help_heading = "Relayer options"
    )]
    pub log_level: Level,
    #[arg(
        long = "audit-log",
        value_name = "AUDIT_LOG_PATH",
        help = "Append-only JSONL audit trail. Overrides TBTC_AUDIT_LOG_PATH.",
        help_heading = "Relayer options"
    )]
    pub audit_log: Option<String>,
}
