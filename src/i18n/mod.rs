//! Localization
//!
//! Keys are dot-separated paths into per-language JSON bundles. Lookups fall
//! back to the default language, then to the key itself; they never fail.

mod preference;

pub use preference::LanguagePreference;

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::RwLock;
use tracing::{debug, info, warn};

use crate::types::{CrmError, Result};

const KEY_DELIMITER: char = '.';

/// Bundles compiled into the binary
const BUNDLED: [(&str, &str); 2] = [
    ("en", include_str!("../../locales/en.json")),
    ("es", include_str!("../../locales/es.json")),
];

pub struct Localizer {
    bundles: BTreeMap<String, Value>,
    default_language: String,
    active: RwLock<String>,
    preference: Option<LanguagePreference>,
}

impl Localizer {
    /// Localizer over the bundled languages.
    ///
    /// The active language comes from the preference file when it names a
    /// known language, otherwise the default.
    pub fn bundled(default_language: &str, preference: Option<LanguagePreference>) -> Result<Self> {
        let mut bundles = BTreeMap::new();
        for (language, raw) in BUNDLED {
            let bundle: Value = serde_json::from_str(raw).map_err(|e| {
                CrmError::Configuration(format!("locale bundle '{}' is invalid: {}", language, e))
            })?;
            bundles.insert(language.to_string(), bundle);
        }
        Self::new(bundles, default_language, preference)
    }

    pub fn new(
        bundles: BTreeMap<String, Value>,
        default_language: &str,
        preference: Option<LanguagePreference>,
    ) -> Result<Self> {
        if !bundles.contains_key(default_language) {
            return Err(CrmError::Configuration(format!(
                "default language '{}' has no translations",
                default_language
            )));
        }

        let active = match preference.as_ref().and_then(|p| p.load()) {
            Some(stored) if bundles.contains_key(&stored) => stored,
            Some(stored) => {
                warn!("Stored language '{}' is not available", stored);
                default_language.to_string()
            }
            None => default_language.to_string(),
        };
        info!("Language: {} (default {})", active, default_language);

        Ok(Self {
            bundles,
            default_language: default_language.to_string(),
            active: RwLock::new(active),
            preference,
        })
    }

    pub fn languages(&self) -> Vec<&str> {
        self.bundles.keys().map(String::as_str).collect()
    }

    pub fn language(&self) -> String {
        match self.active.read() {
            Ok(active) => active.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Switch the active language and persist the choice
    pub fn set_language(&self, language: &str) -> Result<()> {
        if !self.bundles.contains_key(language) {
            return Err(CrmError::BadRequest(format!(
                "unknown language '{}' (available: {})",
                language,
                self.languages().join(", ")
            )));
        }
        match self.active.write() {
            Ok(mut active) => *active = language.to_string(),
            Err(poisoned) => *poisoned.into_inner() = language.to_string(),
        }
        if let Some(preference) = &self.preference {
            preference.store(language)?;
        }
        debug!("Active language is now {}", language);
        Ok(())
    }

    /// Translate `key` in the active language
    pub fn resolve(&self, key: &str, params: Option<&Map<String, Value>>) -> String {
        let active = self.language();
        let text = self
            .lookup(&active, key)
            .or_else(|| self.lookup(&self.default_language, key));
        match (text, params) {
            (Some(text), Some(params)) => interpolate(&text, params),
            (Some(text), None) => text,
            (None, _) => key.to_string(),
        }
    }

    fn lookup(&self, language: &str, key: &str) -> Option<String> {
        let mut node = self.bundles.get(language)?;
        for segment in key.split(KEY_DELIMITER) {
            node = node.get(segment)?;
        }
        match node {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// Replace `{{name}}` placeholders; unknown names are left as written
pub fn interpolate(template: &str, params: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        let name = &rest[start + 2..start + 2 + len];
        out.push_str(&rest[..start]);
        match params.get(name.trim()) {
            Some(Value::String(s)) => out.push_str(s),
            Some(value) => out.push_str(&value.to_string()),
            None => out.push_str(&rest[start..start + 4 + len]),
        }
        rest = &rest[start + 4 + len..];
    }
    out.push_str(rest);
    out
}

/// Parse `name=value` pairs into template parameters
pub fn params_from_pairs(pairs: &[String]) -> Result<Map<String, Value>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), Value::from(v)))
                .ok_or_else(|| CrmError::BadRequest(format!("expected name=value, got '{}'", pair)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn localizer() -> Localizer {
        let mut bundles = BTreeMap::new();
        bundles.insert(
            "en".to_string(),
            json!({ "a": { "b": { "c": "deep" } }, "greeting": "Hello {{name}}", "count": 3 }),
        );
        bundles.insert("es".to_string(), json!({ "greeting": "Hola {{name}}", "a": {} }));
        Localizer::new(bundles, "en", None).unwrap()
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_falls_back_to_default_then_key() {
        let l10n = localizer();
        l10n.set_language("es").unwrap();
        assert_eq!(l10n.resolve("a.b.c", None), "deep");
        assert_eq!(l10n.resolve("x.y.z", None), "x.y.z");
        // An interior node is not a translation
        assert_eq!(l10n.resolve("a.b", None), "a.b");
        assert_eq!(l10n.resolve("count", None), "3");
    }

    #[test]
    fn test_template_params() {
        let l10n = localizer();
        assert_eq!(
            l10n.resolve("greeting", Some(&params(json!({ "name": "Ana" })))),
            "Hello Ana"
        );
        l10n.set_language("es").unwrap();
        assert_eq!(
            l10n.resolve("greeting", Some(&params(json!({ "name": "Ana" })))),
            "Hola Ana"
        );
        assert_eq!(l10n.resolve("greeting", None), "Hola {{name}}");
    }

    #[test]
    fn test_interpolate_leaves_unmatched_placeholders() {
        let p = params(json!({ "a": 1, "b": "two" }));
        assert_eq!(interpolate("{{a}} {{ b }} {{c}}", &p), "1 two {{c}}");
        assert_eq!(interpolate("open {{a", &p), "open {{a");
        assert_eq!(interpolate("no placeholders", &p), "no placeholders");
    }

    #[test]
    fn test_unknown_language_rejected() {
        let l10n = localizer();
        assert!(matches!(l10n.set_language("fr"), Err(CrmError::BadRequest(_))));
        assert_eq!(l10n.language(), "en");
    }

    #[test]
    fn test_preference_read_at_startup_and_written_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.json");

        let l10n = Localizer::bundled("en", Some(LanguagePreference::new(&path))).unwrap();
        assert_eq!(l10n.language(), "en");
        l10n.set_language("es").unwrap();

        let reopened = Localizer::bundled("en", Some(LanguagePreference::new(&path))).unwrap();
        assert_eq!(reopened.language(), "es");
        assert_eq!(reopened.resolve("nav.clients", None), "Clientes");
        // Missing in es, present in en
        assert_eq!(reopened.resolve("login.errors.generic", None), "Sign-in failed. Please try again.");
    }

    #[test]
    fn test_params_from_pairs() {
        let p = params_from_pairs(&["name=Ana".to_string(), "x=a=b".to_string()]).unwrap();
        assert_eq!(p["name"], "Ana");
        assert_eq!(p["x"], "a=b");
        assert!(params_from_pairs(&["oops".to_string()]).is_err());
    }
}
