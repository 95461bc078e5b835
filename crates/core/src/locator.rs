//! Request locators for WMS-style tile endpoints and their fallback variants.

use reqwest::Url;
use thiserror::Error;

/// Query parameter used to defeat intermediate caches on retries
pub const CACHE_TOKEN_PARAM: &str = "_retry";

/// Styling parameters dropped by the conservative variant
const STYLING_PARAMS: &[&str] = &[
    "COLORSCALERANGE",
    "NUMCOLORBANDS",
    "LOGSCALE",
    "ABOVEMAXCOLOR",
    "BELOWMINCOLOR",
    "OPACITY",
    "PALETTE",
    "SLD",
    "SLD_BODY",
    "BGCOLOR",
];

/// Parameters needed to address the tile; everything else is optional
const MINIMAL_PARAMS: &[&str] = &[
    "SERVICE",
    "REQUEST",
    "VERSION",
    "LAYERS",
    "STYLES",
    "CRS",
    "SRS",
    "BBOX",
    "WIDTH",
    "HEIGHT",
    "FORMAT",
    "TIME",
    "ELEVATION",
];

/// Layer identity plus spatial/temporal selectors; never altered by a variant
const IDENTITY_PARAMS: &[&str] = &["LAYERS", "BBOX", "WIDTH", "HEIGHT", "TIME", "ELEVATION"];

/// Geographic systems whose WMS 1.3.0 axis order differs from 1.1.1
const LAT_LON_CRS: &[&str] = &["EPSG:4326", "EPSG:4258", "EPSG:4269"];

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("invalid tile url: {0}")]
    InvalidUrl(String),
    #[error("malformed query string: {0}")]
    InvalidQuery(#[from] serde_urlencoded::de::Error),
    #[error("tile url must use http or https, got {0}")]
    UnsupportedScheme(String),
}

/// Which rewrite of the original locator to request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorVariant {
    /// Unmodified apart from a cache-defeating token
    CacheBusted,
    /// PNG output with errors rendered into the image
    Simplified,
    /// Styling stripped, protocol version pinned to 1.1.1
    Conservative,
    /// Only the parameters strictly needed to address the tile
    Minimal,
}

impl LocatorVariant {
    /// Variant used for the 1-indexed recovery attempt
    pub fn for_attempt(attempt: u32) -> Self {
        match attempt {
            0 | 1 => LocatorVariant::CacheBusted,
            2 => LocatorVariant::Simplified,
            3 => LocatorVariant::Conservative,
            _ => LocatorVariant::Minimal,
        }
    }
}

/// A parsed tile request: endpoint plus ordered query parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileLocator {
    base: Url,
    params: Vec<(String, String)>,
    /// Alternate upstream path serving the same layers
    fallback_base: Option<Url>,
}

impl TileLocator {
    pub fn parse(url: &str) -> Result<Self, LocatorError> {
        let mut base = Url::parse(url).map_err(|e| LocatorError::InvalidUrl(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(LocatorError::UnsupportedScheme(base.scheme().to_string()));
        }
        let params: Vec<(String, String)> =
            serde_urlencoded::from_str(base.query().unwrap_or_default())?;
        base.set_query(None);
        base.set_fragment(None);
        Ok(Self {
            base,
            params,
            fallback_base: None,
        })
    }

    /// Attach an alternate upstream endpoint (e.g. `/ncWMS/wms` for `/wms`)
    pub fn with_fallback_base(mut self, url: &str) -> Result<Self, LocatorError> {
        let mut fallback =
            Url::parse(url).map_err(|e| LocatorError::InvalidUrl(e.to_string()))?;
        fallback.set_query(None);
        self.fallback_base = Some(fallback);
        Ok(self)
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn fallback_base(&self) -> Option<&Url> {
        self.fallback_base.as_ref()
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Case-insensitive parameter lookup
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Replace an existing parameter in place or append it
    pub fn set(&mut self, key: &str, value: &str) {
        match self
            .params
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
        {
            Some(entry) => entry.1 = value.to_string(),
            None => self.params.push((key.to_string(), value.to_string())),
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.params.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
    }

    /// Identifying parameters, for checking that variants preserve them
    pub fn identity(&self) -> Vec<(String, String)> {
        let mut identity: Vec<(String, String)> = IDENTITY_PARAMS
            .iter()
            .filter_map(|key| self.get(key).map(|v| (key.to_string(), v.to_string())))
            .collect();
        if let Some(crs) = self.get("CRS").or_else(|| self.get("SRS")) {
            identity.push(("CRS".to_string(), crs.to_string()));
        }
        identity
    }

    pub fn to_url(&self) -> String {
        if self.params.is_empty() {
            return self.base.to_string();
        }
        let qs = serde_urlencoded::to_string(&self.params).unwrap_or_else(|_| {
            self.params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&")
        });
        format!("{}?{}", self.base, qs)
    }

    /// Same request against the alternate upstream, if one is known
    pub fn on_fallback_base(&self) -> Option<TileLocator> {
        self.fallback_base.as_ref().map(|fallback| TileLocator {
            base: fallback.clone(),
            params: self.params.clone(),
            fallback_base: None,
        })
    }

    /// Build a variant from this (original) locator. `token` defeats caches
    /// and is appended to every variant.
    pub fn variant(&self, variant: LocatorVariant, token: &str) -> TileLocator {
        let mut out = self.clone();
        match variant {
            LocatorVariant::CacheBusted => {}
            LocatorVariant::Simplified => out.simplify_format(),
            LocatorVariant::Conservative => {
                out.simplify_format();
                out.strip_styling();
                out.pin_version();
            }
            LocatorVariant::Minimal => {
                out.strip_styling();
                out.pin_version();
                out.params
                    .retain(|(k, _)| MINIMAL_PARAMS.iter().any(|m| k.eq_ignore_ascii_case(m)));
                out.set("FORMAT", "image/png");
                out.set("STYLES", "");
            }
        }
        out.set(CACHE_TOKEN_PARAM, token);
        out
    }

    fn simplify_format(&mut self) {
        self.set("FORMAT", "image/png");
        self.set("TRANSPARENT", "true");
        self.set("EXCEPTIONS", "INIMAGE");
    }

    fn strip_styling(&mut self) {
        for key in STYLING_PARAMS {
            self.remove(key);
        }
        if self.get("STYLES").is_some() {
            self.set("STYLES", "");
        }
    }

    fn pin_version(&mut self) {
        // 1.3.0 orders these axes lat,lon and 1.1.1 lon,lat; keep the BBOX meaning
        if self.get("CRS").is_some_and(|crs| {
            LAT_LON_CRS.iter().any(|c| c.eq_ignore_ascii_case(crs))
        }) {
            return;
        }
        // WMS 1.1.1 names the reference system SRS instead of CRS
        if let Some(crs) = self.get("CRS").map(str::to_string) {
            self.remove("CRS");
            self.set("SRS", &crs);
        }
        if self.get("VERSION").is_some() || self.get("SERVICE").is_some() {
            self.set("VERSION", "1.1.1");
        }
    }
}
