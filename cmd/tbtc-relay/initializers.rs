use crate::cli::Options;
use tracing_subscriber::{EnvFilter, filter::Directive, fmt, layer::SubscriberExt};

pub fn init_tracing(opts: &Options) {
    let log_filter = EnvFilter::builder()
        .with_default_directive(Directive::from(opts.log_level))
        .from_env_lossy();

    let subscriber = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(log_filter);

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}
