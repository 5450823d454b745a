use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Conversation language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "mr")]
    Marathi,
    #[serde(rename = "hi")]
    Hindi,
    #[default]
    #[serde(rename = "en")]
    English,
}

impl Language {
    /// Locale passed to speech services
    pub fn locale_code(&self) -> &'static str {
        match self {
            Language::Marathi => "mr-IN",
            Language::Hindi => "hi-IN",
            Language::English => "en-US",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Language::Marathi => "Marathi",
            Language::Hindi => "Hindi",
            Language::English => "English",
        }
    }
}

/// Who the assistant is talking to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmerProfile {
    pub name: String,
    pub crop: String,
    #[serde(default)]
    pub language: Language,
}

impl Default for FarmerProfile {
    fn default() -> Self {
        Self {
            name: "Farmer".to_string(),
            crop: "soybean".to_string(),
            language: Language::English,
        }
    }
}

/// Builds the system instruction from a profile
///
/// The session engine never looks inside the profile; it only sends the
/// string this produces.
#[derive(Clone)]
pub struct PersonaTemplate(Arc<dyn Fn(&FarmerProfile) -> String + Send + Sync>);

impl PersonaTemplate {
    pub fn new(template: impl Fn(&FarmerProfile) -> String + Send + Sync + 'static) -> Self {
        Self(Arc::new(template))
    }

    pub fn render(&self, profile: &FarmerProfile) -> String {
        (self.0)(profile)
    }
}

impl Default for PersonaTemplate {
    fn default() -> Self {
        Self::new(|profile| {
            format!(
                "You are 'AI Krushi Mitra', a friendly local agriculture expert. \
                 Speak {} in a warm, conversational village tone. \
                 You are talking with {}, who grows {}. \
                 Keep replies short and practical, the way people talk in the field.",
                profile.language.name(),
                profile.name,
                profile.crop
            )
        })
    }
}

impl fmt::Debug for PersonaTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PersonaTemplate")
    }
}
