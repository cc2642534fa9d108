//! Static identity pools drawn from by the header synthesizer

use serde::Serialize;
use std::fmt;

/// Device class a user agent belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Desktop,
    Mobile,
    Bot,
}

impl DeviceClass {
    pub const ALL: [DeviceClass; 3] = [DeviceClass::Desktop, DeviceClass::Mobile, DeviceClass::Bot];

    /// User agents for this device class
    pub fn user_agents(self) -> &'static [&'static str] {
        match self {
            DeviceClass::Desktop => DESKTOP_USER_AGENTS,
            DeviceClass::Mobile => MOBILE_USER_AGENTS,
            DeviceClass::Bot => BOT_USER_AGENTS,
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceClass::Desktop => "desktop",
            DeviceClass::Mobile => "mobile",
            DeviceClass::Bot => "bot",
        };
        f.write_str(name)
    }
}

pub const DESKTOP_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:123.0) Gecko/20100101 Firefox/123.0",
];

pub const MOBILE_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Mobile Safari/537.36",
];

pub const BOT_USER_AGENTS: &[&str] =
    &["Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)"];

pub const REFERERS: &[&str] = &[
    "https://www.google.com/",
    "https://www.facebook.com/",
    "https://twitter.com/",
    "https://www.reddit.com/",
    "https://www.wikipedia.org/",
    "https://www.amazon.com/",
    "https://mail.google.com/",
];

pub const ACCEPT_LANGUAGES: &[&str] = &[
    "en-US,en;q=0.9",
    "en-GB,en;q=0.8",
    "es-ES,es;q=0.7",
    "fr-FR,fr;q=0.6",
];
