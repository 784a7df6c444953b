use crate::config::HttpSettings;
use reqwest::Client;

const USER_AGENT: &str = concat!("propfeed-rs/", env!("CARGO_PKG_VERSION"));

pub fn build_client(settings: &HttpSettings) -> Client {
    Client::builder()
        .timeout(settings.timeout)
        .connect_timeout(settings.connect_timeout)
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|_| Client::new())
}
