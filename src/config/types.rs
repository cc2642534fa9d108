use serde::Deserialize;

/// Main configuration structure for School-Sweep
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(rename = "proxy-tier", default)]
    pub proxy_tiers: Vec<ProxyTierConfig>,
    #[serde(default)]
    pub headers: HeaderWeights,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub autoscale: AutoscaleConfig,
}

/// Target directory site layout
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Scheme and host of the directory site
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Path of the division list page
    #[serde(rename = "list-path")]
    pub list_path: String,

    /// Query parameter that selects the division
    #[serde(rename = "division-param")]
    pub division_param: String,

    /// CSS selector of the address field on a detail page
    #[serde(rename = "address-selector")]
    pub address_selector: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://schoolquality.virginia.gov".to_string(),
            list_path: "/virginia-schools".to_string(),
            division_param: "division".to_string(),
            address_selector: "span[itemprop='address']".to_string(),
        }
    }
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Maximum number of fetches in flight at once
    #[serde(rename = "max-concurrency")]
    pub max_concurrency: u32,

    /// Rolling per-minute dispatch ceiling
    #[serde(rename = "max-requests-per-minute")]
    pub max_requests_per_minute: u32,

    /// Retries allowed per request before it is marked failed
    #[serde(rename = "max-request-retries")]
    pub max_request_retries: u32,

    /// Lower bound of the randomized pre-dispatch delay (milliseconds)
    #[serde(rename = "politeness-delay-min-ms")]
    pub politeness_delay_min_ms: u64,

    /// Upper bound of the randomized pre-dispatch delay (milliseconds)
    #[serde(rename = "politeness-delay-max-ms")]
    pub politeness_delay_max_ms: u64,

    /// Per-request timeout (seconds)
    #[serde(rename = "request-timeout-secs")]
    pub request_timeout_secs: u64,

    /// Status codes treated as a block signal
    #[serde(rename = "blocked-status-codes")]
    pub blocked_status_codes: Vec<u16>,

    /// Body substrings (case-insensitive) treated as a block signal
    #[serde(rename = "block-markers")]
    pub block_markers: Vec<String>,

    /// Consecutive transport failures on one proxy tier before escalating
    #[serde(rename = "failures-before-escalation")]
    pub failures_before_escalation: u32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            max_requests_per_minute: 150,
            max_request_retries: 3,
            politeness_delay_min_ms: 250,
            politeness_delay_max_ms: 1500,
            request_timeout_secs: 30,
            blocked_status_codes: vec![401, 403, 429],
            block_markers: vec![
                "captcha".to_string(),
                "access denied".to_string(),
                "are you a robot".to_string(),
            ],
            failures_before_escalation: 2,
        }
    }
}

/// Session pool configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Requests a session may serve before it is retired
    #[serde(rename = "max-usage-count")]
    pub max_usage_count: u32,

    /// Upper bound on live sessions kept in the pool
    #[serde(rename = "max-pool-size")]
    pub max_pool_size: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_usage_count: 3,
            max_pool_size: 20,
        }
    }
}

/// One escalation level of proxy endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyTierConfig {
    /// Proxy URLs for this tier; empty means a direct connection
    #[serde(default)]
    pub endpoints: Vec<String>,
}

/// Device-class weights for user agent selection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeaderWeights {
    #[serde(rename = "desktop-weight")]
    pub desktop: f64,

    #[serde(rename = "mobile-weight")]
    pub mobile: f64,

    #[serde(rename = "bot-weight")]
    pub bot: f64,
}

impl Default for HeaderWeights {
    fn default() -> Self {
        Self {
            desktop: 0.7,
            mobile: 0.25,
            bot: 0.05,
        }
    }
}

/// How a division's list page is fingerprinted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintStrategy {
    /// Hash of the ETag, Last-Modified and Content-Length validators from a HEAD probe
    #[default]
    Header,
    /// Hash of the normalized schools table and pager markup
    Content,
}

/// Change-detection cache configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub strategy: FingerprintStrategy,

    /// Path to the SQLite database holding cache entries and job stores
    #[serde(rename = "database-path")]
    pub database_path: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            strategy: FingerprintStrategy::Header,
            database_path: "./school-sweep.db".to_string(),
        }
    }
}

/// Memory-pressure autoscaling configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutoscaleConfig {
    pub enabled: bool,

    /// Memory usage ratio above which desired concurrency is reduced
    #[serde(rename = "memory-high-water")]
    pub memory_high_water: f64,

    /// Memory usage ratio below which desired concurrency may grow back
    #[serde(rename = "memory-low-water")]
    pub memory_low_water: f64,

    #[serde(rename = "sample-interval-ms")]
    pub sample_interval_ms: u64,
}

impl Default for AutoscaleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            memory_high_water: 0.9,
            memory_low_water: 0.7,
            sample_interval_ms: 1000,
        }
    }
}

impl Config {
    /// Returns the configured proxy tiers, falling back to a single direct tier
    pub fn effective_proxy_tiers(&self) -> Vec<ProxyTierConfig> {
        if self.proxy_tiers.is_empty() {
            vec![ProxyTierConfig::default()]
        } else {
            self.proxy_tiers.clone()
        }
    }
}
