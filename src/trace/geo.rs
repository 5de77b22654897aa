//! Geolocation and ISP lookup for public hop addresses over HTTP

use crate::utils::is_geolocatable;
use log::trace;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoInfo {
    pub country: Option<String>,
    pub city: Option<String>,
    pub isp: Option<String>,
    /// Autonomous system, e.g. "AS15169 Google LLC"
    pub asn: Option<String>,
}

impl GeoInfo {
    /// "City, Country (ISP)" with missing parts left out
    pub fn summary(&self) -> String {
        let place = [self.city.as_deref(), self.country.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(", ");
        match (&self.isp, place.is_empty()) {
            (Some(isp), true) => isp.clone(),
            (Some(isp), false) => format!("{} ({})", place, isp),
            (None, _) => place,
        }
    }
}

/// ip-api.com response body
#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    country: Option<String>,
    city: Option<String>,
    isp: Option<String>,
    #[serde(rename = "as")]
    asn: Option<String>,
}

/// Parse a lookup response; failures and "status": "fail" give `None`
pub fn parse_response(body: &str) -> Option<GeoInfo> {
    let response: IpApiResponse = serde_json::from_str(body).ok()?;
    if response.status != "success" {
        return None;
    }
    let non_empty = |s: Option<String>| s.filter(|v| !v.trim().is_empty());

    Some(GeoInfo {
        country: non_empty(response.country),
        city: non_empty(response.city),
        isp: non_empty(response.isp),
        asn: non_empty(response.asn),
    })
}

#[derive(Debug, Clone)]
pub struct GeoLocator {
    client: reqwest::Client,
    endpoint: String,
}

impl GeoLocator {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("argus/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// Look up a public address. Private, loopback and link-local addresses
    /// are skipped without a request; any failure is `None`.
    pub async fn locate(&self, ip: Ipv4Addr) -> Option<GeoInfo> {
        if !is_geolocatable(ip) {
            return None;
        }

        let url = format!("{}{}", self.endpoint, ip);
        let body = match self.client.get(&url).send().await {
            Ok(response) => response.text().await.ok()?,
            Err(e) => {
                trace!("Geolocation for {} failed: {}", ip, e);
                return None;
            }
        };
        parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success() {
        let body = concat!(
            r#"{"status":"success","country":"United States","city":"Mountain View","#,
            r#""isp":"Google LLC","as":"AS15169 Google LLC","query":"8.8.8.8"}"#,
        );
        let geo = parse_response(body).unwrap();
        assert_eq!(geo.city.as_deref(), Some("Mountain View"));
        assert_eq!(geo.asn.as_deref(), Some("AS15169 Google LLC"));
        assert_eq!(geo.summary(), "Mountain View, United States (Google LLC)");
    }

    #[test]
    fn test_parse_failure() {
        assert!(parse_response(r#"{"status":"fail","message":"private range"}"#).is_none());
        assert!(parse_response("<html>").is_none());
    }

    #[tokio::test]
    async fn test_private_address_skipped() {
        // Unroutable endpoint: a request would fail, a skip returns instantly
        let locator = GeoLocator::new("http://127.0.0.1:9/", Duration::from_millis(50));
        assert!(locator.locate(Ipv4Addr::new(192, 168, 1, 1)).await.is_none());
        assert!(locator.locate(Ipv4Addr::new(172, 20, 0, 1)).await.is_none());
    }
}
