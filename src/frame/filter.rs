use url::Url;

/// Signal weights and the score threshold for the ad/tracking classifier.
///
/// The threshold of 2 is empirically chosen; it is a field rather than a
/// constant so callers can tune it per environment.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Minimum summed signal weight required to filter a frame
    pub score_threshold: u32,

    /// Weight of a 1x1/pixel URL pattern (strong)
    pub pixel_pattern_weight: u32,

    /// Weight of a suspicious keyword in the URL or frame name (weak)
    pub keyword_weight: u32,

    /// Weight of a tracker-typical file extension (weak)
    pub extension_weight: u32,

    /// Weight of a known ad/tracking domain (strong)
    pub ad_domain_weight: u32,

    /// Weight of a click/campaign tracking query parameter (strong)
    pub query_param_weight: u32,

    /// Weight of a `data:` URI frame source (strong)
    pub data_uri_weight: u32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            score_threshold: 2,
            pixel_pattern_weight: 2,
            keyword_weight: 1,
            extension_weight: 1,
            ad_domain_weight: 2,
            query_param_weight: 2,
            data_uri_weight: 2,
        }
    }
}

/// Domains that only ever serve ads or trackers
const KNOWN_AD_DOMAINS: &[&str] = &[
    "doubleclick.net",
    "googlesyndication.com",
    "googleadservices.com",
    "google-analytics.com",
    "googletagmanager.com",
    "adservice.google.com",
    "amazon-adsystem.com",
    "adnxs.com",
    "adsrvr.org",
    "criteo.com",
    "criteo.net",
    "taboola.com",
    "outbrain.com",
    "scorecardresearch.com",
    "quantserve.com",
    "rubiconproject.com",
    "pubmatic.com",
    "openx.net",
    "moatads.com",
    "connect.facebook.net",
    "ads-twitter.com",
];

/// Keywords that show up in ad/tracking frame URLs and names
const SUSPICIOUS_KEYWORDS: &[&str] = &[
    "advert",
    "banner",
    "sponsor",
    "beacon",
    "analytics",
    "tracker",
    "tracking",
    "telemetry",
    "adframe",
    "adserver",
    "adsync",
    "prebid",
];

/// Query parameters that identify click/campaign tracking redirects
const TRACKING_QUERY_PARAMS: &[&str] = &[
    "utm_source",
    "utm_campaign",
    "gclid",
    "fbclid",
    "dclid",
    "msclkid",
    "clickid",
    "click_id",
];

/// Classify a frame as an ad/tracking frame with the default config.
///
/// `about:blank` is never filtered: bootstrap frames commonly start blank and
/// redirect after load.
pub fn is_ad_or_tracking_frame(url: &str, name: Option<&str>, parent_url: Option<&str>) -> bool {
    classify_frame(url, name, parent_url, &FilterConfig::default())
}

/// Weighted-signal classification.
///
/// A frame is filtered when the summed weight of matched signals reaches the
/// threshold, unless no *strong* signal matched and the frame is same-site as
/// its parent. The same-site exception prevents false positives on legitimate
/// same-origin assets with pixel/sync-looking names.
pub fn classify_frame(
    url: &str,
    name: Option<&str>,
    parent_url: Option<&str>,
    config: &FilterConfig,
) -> bool {
    if url.is_empty() || url == "about:blank" {
        return false;
    }

    let lower_url = url.to_ascii_lowercase();
    let lower_name = name.map(|n| n.to_ascii_lowercase()).unwrap_or_default();
    let parsed = Url::parse(url).ok();
    let host = parsed.as_ref().and_then(Url::host_str).unwrap_or_default();

    let mut score = 0u32;
    let mut strong_signal = false;

    if lower_url.starts_with("data:") {
        score += config.data_uri_weight;
        strong_signal = true;
    }

    if is_known_ad_domain(host) {
        score += config.ad_domain_weight;
        strong_signal = true;
    }

    if has_pixel_pattern(&lower_url, &lower_name) {
        score += config.pixel_pattern_weight;
        strong_signal = true;
    }

    if has_tracking_query_param(parsed.as_ref()) {
        score += config.query_param_weight;
        strong_signal = true;
    }

    if SUSPICIOUS_KEYWORDS
        .iter()
        .any(|k| lower_url.contains(k) || lower_name.contains(k))
    {
        score += config.keyword_weight;
    }

    if has_tracking_extension(parsed.as_ref()) {
        score += config.extension_weight;
    }

    if score < config.score_threshold {
        return false;
    }

    if !strong_signal {
        let parent_host = parent_url
            .and_then(|p| Url::parse(p).ok())
            .and_then(|p| p.host_str().map(str::to_string));
        if let Some(parent_host) = parent_host {
            if !host.is_empty() && same_site(host, &parent_host) {
                return false;
            }
        }
    }

    true
}

fn is_known_ad_domain(host: &str) -> bool {
    if host.is_empty() {
        return false;
    }
    KNOWN_AD_DOMAINS
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{}", domain)))
}

fn has_pixel_pattern(lower_url: &str, lower_name: &str) -> bool {
    lower_url.contains("1x1")
        || lower_url.contains("pixel")
        || lower_name.contains("pixel")
        || lower_url.contains("px.gif")
}

fn has_tracking_query_param(parsed: Option<&Url>) -> bool {
    let Some(url) = parsed else {
        return false;
    };
    url.query_pairs()
        .any(|(key, _)| TRACKING_QUERY_PARAMS.contains(&key.to_ascii_lowercase().as_str()))
}

fn has_tracking_extension(parsed: Option<&Url>) -> bool {
    let Some(url) = parsed else {
        return false;
    };
    let path = url.path().to_ascii_lowercase();
    // Frames pointing at bare images are almost always trackers.
    path.ends_with(".gif") || path.ends_with(".png") || path.ends_with(".swf")
}

/// Hostnames are same-site when equal or suffix-related
/// (e.g. `sync.shop.example.com` and `example.com`, or two subdomains of
/// the same registrable domain).
fn same_site(host: &str, parent_host: &str) -> bool {
    host == parent_host
        || host.ends_with(&format!(".{}", parent_host))
        || parent_host.ends_with(&format!(".{}", host))
        || registrable_suffix(host) == registrable_suffix(parent_host)
}

/// Last two labels of a hostname, a cheap stand-in for the registrable domain
fn registrable_suffix(host: &str) -> String {
    let mut labels: Vec<&str> = host.rsplit('.').take(2).collect();
    labels.reverse();
    labels.join(".")
}
