use serde::{Deserialize, Serialize};

/// Engine configuration.
///
/// Field names serialize in the form callers pass them (`noHelpers`,
/// `clear`). The data source is injected separately on the engine because it
/// is a live collaborator, not configuration data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MacroOptions {
    /// Omit the default helper frame from the context stack.
    pub no_helpers: bool,

    /// Unresolved paths render as an empty string instead of their literal
    /// `{path}` text.
    pub clear: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_deserialize_with_defaults() {
        let options: MacroOptions = serde_json::from_str("{}").unwrap();
        assert!(!options.no_helpers);
        assert!(!options.clear);

        let options: MacroOptions =
            serde_json::from_str(r#"{"noHelpers": true, "clear": true}"#).unwrap();
        assert!(options.no_helpers);
        assert!(options.clear);
    }
}
