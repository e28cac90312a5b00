//! Simulated user personas.
//!
//! Each simulated user presents as one client for its whole lifetime: a
//! public IPv4 address carried in the forwarded-for header, a browser header
//! set and user agent for web traffic, and an API client header set and user
//! agent for api traffic.

use std::net::Ipv4Addr;

use crate::{
    entropy::{Entropy, choose},
    sitemap::TrafficType,
};

type HeaderSet = &'static [(&'static str, &'static str)];

const WEB_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 12_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.6 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:102.0) Gecko/20100101 Firefox/102.0",
    "Mozilla/5.0 (iPad; CPU OS 15_5 like Mac OS X) AppleWebKit/606.1.15 (KHTML, like Gecko) Version/15.0 Mobile/15E148 Safari/605.1.15",
    "Mozilla/5.0 (Android 12; Mobile; rv:102.0) Gecko/102.0 Firefox/102.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 16_0 like Mac OS X) AppleWebKit/606.1.15 (KHTML, like Gecko) Version/15.6 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/115.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13.5; rv:109.0) Gecko/20100101 Firefox/115.0",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/115.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/116.0.0.0 Safari/537.36 Edg/116.0.1938.69",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.5 Safari/605.1.15",
    "Mozilla/5.0 (Linux; Android 13; Pixel 7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/115.0.0.0 Mobile Safari/537.36",
];

const API_USER_AGENTS: &[&str] = &[
    "PostmanRuntime/7.29.0",
    "Python-requests/2.27.1",
    "curl/7.79.1",
    "Go-http-client/1.1",
    "Wget/1.20.3 (linux-gnu)",
    "Apache-HttpClient/4.5.13 (Java/11.0.15)",
    "axios/0.21.1 Node.js/v14.17.0",
    "Java/1.8.0_281",
    "libwww-perl/6.31",
    "HTTPie/2.5.0",
    "okhttp/4.9.1",
    "Faraday v2.7.10",
    "Dart/2.17 (dart:io)",
    "Xamarin/3.0.0 (Xamarin.Android; Android 13; SDK 33)",
    "Insomnia/2023.5.8",
    "Nodejs-v16.16.0",
    "Dalvik/2.1.0 (Linux; U; Android 13; SM-S918B Build/TP1A.220624.014)",
    "aws-sdk-js-2.1395.0",
    "Swift-URLSession",
    "ruby rest-client/2.1.0",
];

// Header names are lowercase, they are handed to `HeaderName::from_static`.
const WEB_HEADER_SETS: &[HeaderSet] = &[
    &[
        ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        ("accept-language", "en-US,en;q=0.5"),
        ("connection", "keep-alive"),
        ("upgrade-insecure-requests", "1"),
        ("dnt", "1"),
    ],
    &[
        ("accept", "application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"),
        ("accept-language", "en-GB,en;q=0.5"),
        ("connection", "keep-alive"),
        ("upgrade-insecure-requests", "1"),
        ("dnt", "1"),
        ("sec-fetch-site", "none"),
        ("sec-fetch-mode", "navigate"),
    ],
    &[
        ("accept", "text/html,application/xhtml+xml"),
        ("accept-language", "fr-FR,fr;q=0.5"),
        ("connection", "keep-alive"),
        ("upgrade-insecure-requests", "1"),
        ("cache-control", "no-cache"),
    ],
    &[
        ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9"),
        ("accept-language", "de-DE,de;q=0.5"),
        ("connection", "keep-alive"),
        ("pragma", "no-cache"),
        ("sec-fetch-user", "?1"),
    ],
    &[
        ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        ("accept-language", "es-ES,es;q=0.5"),
        ("connection", "keep-alive"),
        ("dnt", "1"),
        ("sec-fetch-site", "cross-site"),
    ],
    &[
        ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9"),
        ("accept-language", "it-IT,it;q=0.5"),
        ("connection", "keep-alive"),
        ("upgrade-insecure-requests", "1"),
        ("cache-control", "max-age=0"),
    ],
    &[
        ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        ("accept-language", "ja-JP,ja;q=0.5"),
        ("connection", "keep-alive"),
        ("upgrade-insecure-requests", "1"),
    ],
    &[
        ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"),
        ("accept-language", "ko-KR,ko;q=0.5"),
        ("connection", "keep-alive"),
        ("upgrade-insecure-requests", "1"),
        ("sec-fetch-dest", "document"),
    ],
    &[
        ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9"),
        ("accept-language", "zh-CN,zh;q=0.5"),
        ("connection", "keep-alive"),
        ("pragma", "no-cache"),
    ],
    &[
        ("accept", "application/xhtml+xml,application/xml,*/*;q=0.8"),
        ("accept-language", "ru-RU,ru;q=0.5"),
        ("connection", "keep-alive"),
        ("dnt", "1"),
    ],
    &[
        ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        ("accept-language", "en-AU,en;q=0.5"),
        ("connection", "keep-alive"),
        ("upgrade-insecure-requests", "1"),
        ("sec-fetch-mode", "navigate"),
    ],
    &[
        ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9"),
        ("accept-language", "en-CA,en;q=0.5"),
        ("connection", "keep-alive"),
        ("upgrade-insecure-requests", "1"),
    ],
    &[
        ("accept", "application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"),
        ("accept-language", "en-IE,en;q=0.5"),
        ("connection", "keep-alive"),
        ("sec-fetch-site", "none"),
        ("cache-control", "max-age=0"),
    ],
    &[
        ("accept", "text/html,application/xhtml+xml"),
        ("accept-language", "sv-SE,sv;q=0.5"),
        ("connection", "keep-alive"),
        ("dnt", "1"),
        ("sec-fetch-dest", "document"),
    ],
    &[
        ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9"),
        ("accept-language", "pt-PT,pt;q=0.5"),
        ("connection", "keep-alive"),
        ("pragma", "no-cache"),
        ("sec-fetch-mode", "navigate"),
    ],
    &[
        ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        ("accept-language", "nl-NL,nl;q=0.5"),
        ("connection", "keep-alive"),
        ("sec-fetch-site", "same-origin"),
    ],
    &[
        ("accept", "text/html,application/xhtml+xml,application/xml;q=0.9"),
        ("accept-language", "pl-PL,pl;q=0.5"),
        ("connection", "keep-alive"),
        ("upgrade-insecure-requests", "1"),
    ],
    &[
        ("accept", "application/json"),
        ("accept-language", "en-US,en;q=0.5"),
        ("connection", "keep-alive"),
        ("x-requested-with", "XMLHttpRequest"),
    ],
    &[
        ("accept", "application/x-www-form-urlencoded"),
        ("accept-language", "en-GB,en;q=0.5"),
        ("connection", "keep-alive"),
    ],
    &[
        ("accept", "text/html,*/*;q=0.8"),
        ("accept-language", "fr-FR,fr;q=0.5"),
        ("connection", "keep-alive"),
        ("upgrade-insecure-requests", "1"),
    ],
    &[
        ("accept", "image/webp,image/*,*/*;q=0.8"),
        ("accept-language", "es-ES,es;q=0.5"),
        ("connection", "keep-alive"),
        ("dnt", "1"),
    ],
];

const API_HEADER_SETS: &[HeaderSet] = &[
    &[
        ("accept", "application/json"),
        ("connection", "keep-alive"),
        ("accept-encoding", "gzip, deflate, br"),
        ("dnt", "1"),
        ("cache-control", "no-cache"),
        ("pragma", "no-cache"),
    ],
    &[
        ("accept", "application/xml"),
        ("connection", "keep-alive"),
        ("accept-encoding", "gzip, deflate"),
        ("dnt", "1"),
        ("x-requested-with", "XMLHttpRequest"),
    ],
    &[
        ("accept", "*/*"),
        ("connection", "keep-alive"),
        ("accept-encoding", "gzip, deflate"),
        ("cache-control", "no-cache"),
        ("x-forwarded-proto", "https"),
    ],
    &[
        ("accept", "application/json, text/plain, */*"),
        ("connection", "keep-alive"),
        ("accept-encoding", "gzip, deflate, br"),
        ("x-real-ip", "192.0.2.123"),
    ],
    &[
        ("accept", "application/json"),
        ("connection", "keep-alive"),
        ("accept-encoding", "gzip, deflate"),
        ("user-token", "randomtoken123456"),
        ("forwarded", "for=198.51.100.50;proto=https"),
    ],
    &[
        ("accept", "application/json"),
        ("connection", "keep-alive"),
        ("accept-language", "en-US,en;q=0.5"),
        ("x-trace-id", "trace-56789"),
        ("x-device-id", "device-98765"),
    ],
    &[
        ("accept", "application/vnd.api+json"),
        ("connection", "keep-alive"),
        ("authorization", "Bearer random_api_token"),
        ("x-api-version", "2.0"),
        ("accept-encoding", "gzip, deflate, br"),
    ],
    &[
        ("accept", "application/ld+json"),
        ("connection", "keep-alive"),
        ("x-correlation-id", "some_correlation_id"),
        ("content-type", "application/json"),
        ("accept-encoding", "gzip, deflate"),
    ],
    &[
        ("accept", "text/csv"),
        ("connection", "keep-alive"),
        ("x-auth-token", "some_auth_token"),
        ("accept-encoding", "gzip, deflate, br"),
        ("content-type", "text/csv"),
    ],
    &[
        ("accept", "application/x-www-form-urlencoded"),
        ("connection", "keep-alive"),
        ("accept-encoding", "gzip, deflate"),
        ("x-client-version", "1.1.0"),
        ("content-type", "application/x-www-form-urlencoded"),
    ],
    &[
        ("accept", "application/protobuf"),
        ("connection", "keep-alive"),
        ("content-type", "application/protobuf"),
        ("accept-encoding", "gzip, deflate"),
    ],
    &[
        ("accept", "application/octet-stream"),
        ("connection", "keep-alive"),
        ("content-type", "application/octet-stream"),
        ("accept-encoding", "gzip, deflate, br"),
    ],
    &[
        ("accept", "application/graphql"),
        ("connection", "keep-alive"),
        ("content-type", "application/graphql"),
        ("accept-encoding", "gzip, deflate"),
    ],
    &[
        ("accept", "text/plain"),
        ("connection", "keep-alive"),
        ("content-type", "text/plain"),
        ("accept-encoding", "gzip, deflate, br"),
    ],
    &[
        ("accept", "application/jwt"),
        ("connection", "keep-alive"),
        ("authorization", "Bearer some_jwt_token"),
        ("accept-encoding", "gzip, deflate"),
    ],
    &[
        ("accept", "application/vnd.ms-excel"),
        ("connection", "keep-alive"),
        ("accept-encoding", "gzip, deflate, br"),
        ("content-type", "application/vnd.ms-excel"),
    ],
    &[
        ("accept", "image/png"),
        ("connection", "keep-alive"),
        ("accept-encoding", "gzip, deflate"),
    ],
    &[
        ("accept", "image/jpeg"),
        ("connection", "keep-alive"),
        ("accept-encoding", "gzip, deflate, br"),
    ],
    &[
        ("accept", "application/pdf"),
        ("connection", "keep-alive"),
        ("accept-encoding", "gzip, deflate, br"),
    ],
];

/// The client a simulated user presents as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Persona {
    /// Address carried in the forwarded-for header
    pub address: Ipv4Addr,
    web_headers: HeaderSet,
    web_agent: &'static str,
    api_headers: HeaderSet,
    api_agent: &'static str,
}

impl Persona {
    /// Draw a persona.
    pub fn generate<E>(entropy: &mut E) -> Self
    where
        E: Entropy + ?Sized,
    {
        Self {
            address: random_public_ipv4(entropy),
            web_headers: choose(entropy, WEB_HEADER_SETS).copied().unwrap_or(&[]),
            web_agent: choose(entropy, WEB_USER_AGENTS).copied().unwrap_or_default(),
            api_headers: choose(entropy, API_HEADER_SETS).copied().unwrap_or(&[]),
            api_agent: choose(entropy, API_USER_AGENTS).copied().unwrap_or_default(),
        }
    }

    /// Default headers for `traffic`.
    #[must_use]
    pub fn headers(&self, traffic: TrafficType) -> &'static [(&'static str, &'static str)] {
        match traffic {
            TrafficType::Web => self.web_headers,
            TrafficType::Api => self.api_headers,
        }
    }

    /// User agent for `traffic`.
    #[must_use]
    pub fn user_agent(&self, traffic: TrafficType) -> &'static str {
        match traffic {
            TrafficType::Web => self.web_agent,
            TrafficType::Api => self.api_agent,
        }
    }
}

fn octet<E>(entropy: &mut E, lo: u8, hi: u8) -> u8
where
    E: Entropy + ?Sized,
{
    u8::try_from(entropy.integer(i64::from(lo), i64::from(hi))).unwrap_or(lo)
}

/// A random unicast IPv4 address outside the private, loopback, shared and
/// link-local ranges. The host octet is never 0 or 255.
pub fn random_public_ipv4<E>(entropy: &mut E) -> Ipv4Addr
where
    E: Entropy + ?Sized,
{
    loop {
        let first = octet(entropy, 1, 223);
        let second = octet(entropy, 0, 255);
        let reserved = match first {
            10 | 127 => true,
            172 => (16..=31).contains(&second),
            192 => second == 168,
            100 => (64..=127).contains(&second),
            169 => second == 254,
            _ => false,
        };
        if reserved {
            continue;
        }
        let third = octet(entropy, 0, 255);
        let fourth = octet(entropy, 1, 254);
        return Ipv4Addr::new(first, second, third, fourth);
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use http::HeaderName;
    use proptest::prelude::*;

    use super::{API_HEADER_SETS, Persona, WEB_HEADER_SETS, random_public_ipv4};
    use crate::{
        entropy::{seeded, test::Scripted},
        sitemap::TrafficType,
    };

    fn is_public(ip: Ipv4Addr) -> bool {
        let [a, b, _, d] = ip.octets();
        let shared = a == 100 && (64..=127).contains(&b);
        (1..=223).contains(&a)
            && (1..=254).contains(&d)
            && !ip.is_private()
            && !ip.is_loopback()
            && !ip.is_link_local()
            && !shared
    }

    #[test]
    fn reserved_draws_are_retried() {
        // 10.x is rejected, then 8.8.4.4 is accepted.
        let mut entropy = Scripted::new(&[10, 1, 8, 8, 4, 4]);
        assert_eq!(
            random_public_ipv4(&mut entropy),
            Ipv4Addr::new(8, 8, 4, 4)
        );
    }

    #[test]
    fn catalog_header_names_are_valid() {
        for set in WEB_HEADER_SETS.iter().chain(API_HEADER_SETS) {
            for (name, _) in *set {
                // Panics on invalid or non-lowercase names.
                let _ = HeaderName::from_static(*name);
            }
        }
    }

    #[test]
    fn persona_defaults_follow_traffic_type() {
        let persona = Persona::generate(&mut Scripted::new(&[]));
        assert_eq!(persona.headers(TrafficType::Web), WEB_HEADER_SETS[0]);
        assert_eq!(persona.headers(TrafficType::Api), API_HEADER_SETS[0]);
        assert!(persona.user_agent(TrafficType::Web).starts_with("Mozilla"));
        assert_eq!(persona.user_agent(TrafficType::Api), "PostmanRuntime/7.29.0");
    }

    proptest! {
        #[test]
        fn generated_address_is_public(seed: [u8; 32]) {
            let mut rng = seeded(Some(seed));
            for _ in 0..64 {
                let ip = random_public_ipv4(&mut rng);
                prop_assert!(is_public(ip), "{ip} is not public");
            }
        }
    }
}
