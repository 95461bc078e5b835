use serde::{Deserialize, Serialize};

/// Static category of a tracked resource. Governs default classification.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceClass {
    /// Layers with a forecast frame for every timestep
    #[default]
    ContinuousForecast,
    /// Layers that only publish data on some timesteps (e.g. 3-hourly products)
    LimitedTemporal,
    /// Layers without a time dimension
    Static,
}

impl ResourceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::ContinuousForecast => "continuous-forecast",
            ResourceClass::LimitedTemporal => "limited-temporal",
            ResourceClass::Static => "static",
        }
    }
}

impl std::fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ResourceClass {
    fn from(s: &str) -> Self {
        match s {
            "limited-temporal" => ResourceClass::LimitedTemporal,
            "static" => ResourceClass::Static,
            _ => ResourceClass::ContinuousForecast, // Default fallback
        }
    }
}

/// What the rendering layer knows about a tracked resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub id: String,
    pub name: String,
    pub class: ResourceClass,
}

impl ResourceDescriptor {
    pub fn new(id: &str, name: &str, class: ResourceClass) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            class,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_parses_kebab_names() {
        assert_eq!(ResourceClass::from("limited-temporal"), ResourceClass::LimitedTemporal);
        assert_eq!(ResourceClass::from("static"), ResourceClass::Static);
        assert_eq!(ResourceClass::from("continuous-forecast"), ResourceClass::ContinuousForecast);
        assert_eq!(ResourceClass::from("bogus"), ResourceClass::ContinuousForecast);
    }

    #[test]
    fn class_serializes_kebab_case() {
        let json = serde_json::to_string(&ResourceClass::LimitedTemporal).unwrap();
        assert_eq!(json, "\"limited-temporal\"");
    }
}
