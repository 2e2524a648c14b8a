#[derive(Debug, Clone, Copy, Default)]
pub struct Config {
    /// Answer rejected requests and failed dials with a SOCKS5 reply code
    /// instead of closing the connection silently.
    pub reply_on_failure: bool,
}
