#[derive(clap::Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Base URL of the paleobiology upstream.
    #[clap(long = "paleo-base-url", env = "PALEO_BASE_URL")]
    pub paleo_base_url: url::Url,
    /// Base URL of the quaternary-fauna upstream.
    #[clap(long = "quaternary-base-url", env = "QUATERNARY_BASE_URL")]
    pub quaternary_base_url: url::Url,
    /// Composite request deadline in seconds. Zero disables the deadline.
    #[clap(long = "composite-timeout", env = "COMPOSITE_TIMEOUT_SECS", default_value = "10")]
    pub composite_timeout_secs: u64,
    /// Retry budget per subquery for retryable upstream statuses (595/596/597).
    #[clap(long = "retries", env = "COMPOSITE_RETRIES", default_value = "2")]
    pub retries: u32,
    /// Port to bind the HTTP server to.
    #[clap(long = "port", env = "PORT", default_value = "8080")]
    pub port: u16,
}
