use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    #[serde(default, deserialize_with = "price", skip_serializing_if = "Option::is_none")]
    pub prompt: Option<f64>,
    #[serde(default, deserialize_with = "price", skip_serializing_if = "Option::is_none")]
    pub completion: Option<f64>,
}

/// A model descriptor from the routing API catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmModel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub pricing: Pricing,
}

impl LlmModel {
    /// Descriptor for a model id the catalog did not report.
    pub fn bare(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            pricing: Pricing::default(),
        }
    }

    /// The id without its vendor prefix, e.g. `deepseek-r1` for `deepseek/deepseek-r1`.
    pub fn short_name(&self) -> &str {
        match self.id.split_once('/') {
            Some((_, rest)) => rest,
            None => &self.id,
        }
    }

    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.id.to_lowercase().contains(&query) || self.name.to_lowercase().contains(&query)
    }
}

// The catalog reports prices as decimal strings; older blobs stored numbers.
fn price<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    match Option::<Repr>::deserialize(deserializer)? {
        Some(Repr::Number(n)) => Ok(Some(n)),
        Some(Repr::Text(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}
