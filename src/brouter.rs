//! Connector routes from a BRouter server
//!
//! [BRouter](https://github.com/abrensch/brouter) answers
//! `GET /brouter?lonlats=..&profile=..&format=gpx` with a GPX track.

use std::time::Duration;

use reqwest::blocking::Client;
use tracing::{debug, instrument};

use crate::merge::{ConnectorError, ConnectorRouter};
use crate::types::GeoPoint;

pub const DEFAULT_BASE_URL: &str = "http://localhost:17777";
pub const DEFAULT_PROFILE: &str = "trekking";

/// Blocking client for one BRouter instance.
#[derive(Clone, Debug)]
pub struct BRouter {
    client: Client,
    base_url: String,
    profile: String,
}

impl BRouter {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ConnectorError> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            profile: DEFAULT_PROFILE.to_owned(),
        })
    }

    pub fn with_profile(self, profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            ..self
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }
}

/// BRouter wants longitude first.
fn lonlats(from: &GeoPoint, to: &GeoPoint) -> String {
    format!("{},{}|{},{}", from.lon().0, from.lat().0, to.lon().0, to.lat().0)
}

impl ConnectorRouter for BRouter {
    #[instrument(level = "trace", skip_all)]
    fn route(&self, from: &GeoPoint, to: &GeoPoint) -> Result<String, ConnectorError> {
        let lonlats = lonlats(from, to);
        debug!("Requesting {} route for {}", self.profile, lonlats);
        let response = self
            .client
            .get(format!("{}/brouter", self.base_url))
            .query(&[
                ("lonlats", lonlats.as_str()),
                ("profile", self.profile.as_str()),
                ("format", "gpx"),
            ])
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(ConnectorError::Status(status.as_u16()));
        }
        Ok(response.text()?)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::{BRouter, DEFAULT_PROFILE, lonlats};
    use crate::geo_point;

    #[test]
    fn test_lonlats_order() -> Result<()> {
        let from = geo_point!(48.1351, 11.582);
        let to = geo_point!(47.4917, 11.0953);
        assert_eq!(lonlats(&from, &to), "11.582,48.1351|11.0953,47.4917");
        Ok(())
    }

    #[test]
    fn test_base_url_trailing_slash() -> Result<()> {
        let router = BRouter::new("http://brouter.example:17777/")?.with_profile("fastbike");
        assert_eq!(router.base_url(), "http://brouter.example:17777");
        assert_eq!(router.profile(), "fastbike");
        assert_ne!(router.profile(), DEFAULT_PROFILE);
        Ok(())
    }
}
