//! Request context extraction
//!
//! Normalises an inbound request into the device and location metadata that
//! sessions and activity records carry. Location is never looked up here: it
//! is taken from the headers set by the edge proxy in front of the service.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";
const COUNTRY_HEADERS: [&str; 2] = ["cf-ipcountry", "x-country-code"];
const CITY_HEADERS: [&str; 2] = ["cf-ipcity", "x-city"];

/// Device and location metadata of one inbound request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
}

/// Whether an attribute carries real information
pub fn is_known(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty() && !v.eq_ignore_ascii_case("unknown"))
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn first_header<'a>(headers: &'a HeaderMap, names: &[&str]) -> Option<&'a str> {
    names.iter().find_map(|name| header_value(headers, name))
}

/// Build the request context from headers and the peer address
pub fn extract_request_info(headers: &HeaderMap, peer: Option<SocketAddr>) -> RequestInfo {
    let ip_address = header_value(headers, FORWARDED_FOR)
        .and_then(|chain| chain.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| header_value(headers, REAL_IP).map(str::to_string))
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string());

    let user_agent = header_value(headers, axum::http::header::USER_AGENT.as_str())
        .map(str::to_string);
    let (device_type, browser, os) = match user_agent.as_deref() {
        Some(ua) => classify_user_agent(ua),
        None => (None, None, None),
    };

    // "XX" is the proxy's marker for an unresolved address
    let country = first_header(headers, &COUNTRY_HEADERS)
        .map(str::to_ascii_uppercase)
        .filter(|code| code != "XX");
    let city = first_header(headers, &CITY_HEADERS).map(str::to_string);

    RequestInfo {
        ip_address,
        user_agent,
        device_type,
        browser,
        os,
        country,
        city,
    }
}

/// Classify a User-Agent into (device type, browser, OS)
pub fn classify_user_agent(ua: &str) -> (Option<String>, Option<String>, Option<String>) {
    let ua = ua.to_ascii_lowercase();

    let device_type = if ua.contains("bot") || ua.contains("crawler") || ua.contains("spider") {
        "bot"
    } else if ua.contains("ipad") || ua.contains("tablet") {
        "tablet"
    } else if ua.contains("mobi") || ua.contains("iphone") || ua.contains("android") {
        "mobile"
    } else {
        "desktop"
    };

    // Order matters: Edge and Opera also advertise Chrome, Chrome advertises Safari.
    let browser = if ua.contains("edg/") {
        Some("Edge")
    } else if ua.contains("opr/") || ua.contains("opera") {
        Some("Opera")
    } else if ua.contains("firefox/") || ua.contains("fxios/") {
        Some("Firefox")
    } else if ua.contains("chrome/") || ua.contains("crios/") {
        Some("Chrome")
    } else if ua.contains("safari/") {
        Some("Safari")
    } else {
        None
    };

    let os = if ua.contains("windows") {
        Some("Windows")
    } else if ua.contains("iphone") || ua.contains("ipad") {
        Some("iOS")
    } else if ua.contains("android") {
        Some("Android")
    } else if ua.contains("mac os x") || ua.contains("macintosh") {
        Some("macOS")
    } else if ua.contains("cros ") {
        Some("ChromeOS")
    } else if ua.contains("linux") {
        Some("Linux")
    } else {
        None
    };

    (
        Some(device_type.to_string()),
        browser.map(str::to_string),
        os.map(str::to_string),
    )
}

/// Mask an IP address for display
///
/// IPv4 keeps the first three octets, IPv6 the first two hextets. Anything
/// that does not parse as an address is replaced entirely.
pub fn mask_ip(ip: &str) -> String {
    let trimmed = ip.trim();
    let parsed = trimmed
        .parse::<IpAddr>()
        .ok()
        .or_else(|| trimmed.parse::<SocketAddr>().ok().map(|addr| addr.ip()));

    match parsed {
        Some(IpAddr::V4(v4)) => {
            let [a, b, c, _] = v4.octets();
            format!("{a}.{b}.{c}.xxx")
        }
        Some(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
            Some(v4) => mask_ip(&v4.to_string()),
            None => {
                let segments = v6.segments();
                format!("{:x}:{:x}:xxxx:xxxx:xxxx:xxxx:xxxx:xxxx", segments[0], segments[1])
            }
        },
        None => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const CHROME_WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";
    const SAFARI_IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1";
    const FIREFOX_ANDROID: &str = "Mozilla/5.0 (Android 14; Mobile; rv:127.0) Gecko/127.0 Firefox/127.0";

    #[test]
    fn test_classify_user_agent() {
        assert_eq!(
            classify_user_agent(CHROME_WINDOWS),
            (
                Some("desktop".to_string()),
                Some("Chrome".to_string()),
                Some("Windows".to_string())
            )
        );
        assert_eq!(
            classify_user_agent(SAFARI_IPHONE),
            (
                Some("mobile".to_string()),
                Some("Safari".to_string()),
                Some("iOS".to_string())
            )
        );
        assert_eq!(
            classify_user_agent(FIREFOX_ANDROID),
            (
                Some("mobile".to_string()),
                Some("Firefox".to_string()),
                Some("Android".to_string())
            )
        );
    }

    #[test]
    fn test_extract_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert(REAL_IP, HeaderValue::from_static("198.51.100.2"));
        headers.insert("user-agent", HeaderValue::from_static(CHROME_WINDOWS));
        headers.insert("cf-ipcountry", HeaderValue::from_static("us"));
        headers.insert("x-city", HeaderValue::from_static("Boston"));

        let info = extract_request_info(&headers, Some("127.0.0.1:4000".parse().unwrap()));
        assert_eq!(info.ip_address, "203.0.113.7");
        assert_eq!(info.country.as_deref(), Some("US"));
        assert_eq!(info.city.as_deref(), Some("Boston"));
        assert_eq!(info.browser.as_deref(), Some("Chrome"));
    }

    #[test]
    fn test_extract_falls_back_to_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-ipcountry", HeaderValue::from_static("XX"));

        let info = extract_request_info(&headers, Some("192.0.2.10:55000".parse().unwrap()));
        assert_eq!(info.ip_address, "192.0.2.10");
        assert_eq!(info.country, None);
        assert_eq!(info.device_type, None);

        let info = extract_request_info(&HeaderMap::new(), None);
        assert_eq!(info.ip_address, "unknown");
    }

    #[test]
    fn test_mask_ip() {
        assert_eq!(mask_ip("203.0.113.77"), "203.0.113.xxx");
        assert_eq!(mask_ip("203.0.113.77:8080"), "203.0.113.xxx");
        assert_eq!(mask_ip("::ffff:198.51.100.4"), "198.51.100.xxx");
        assert_eq!(
            mask_ip("2001:db8:85a3::8a2e:370:7334"),
            "2001:db8:xxxx:xxxx:xxxx:xxxx:xxxx:xxxx"
        );
        assert_eq!(mask_ip("not-an-ip"), "unknown");
    }

    #[test]
    fn test_is_known() {
        assert!(is_known(Some("US")));
        assert!(!is_known(Some("Unknown")));
        assert!(!is_known(Some("  ")));
        assert!(!is_known(None));
    }
}
