use regex::Regex;

/// Coarse schema-name gate applied before row decoding.
///
/// An exclude match rejects outright; otherwise an include pattern, when set,
/// must match. Installed once at bootstrap and read-only afterwards.
#[derive(Debug, Default)]
pub struct SchemaFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
}

impl SchemaFilter {
    pub fn new(include: Option<Regex>, exclude: Option<Regex>) -> Self {
        SchemaFilter { include, exclude }
    }

    /// Compile a filter from optional pattern strings; empty strings mean
    /// unset.
    pub fn from_patterns(include: &str, exclude: &str) -> Result<Self, regex::Error> {
        let include = (!include.is_empty()).then(|| Regex::new(include)).transpose()?;
        let exclude = (!exclude.is_empty()).then(|| Regex::new(exclude)).transpose()?;
        Ok(SchemaFilter { include, exclude })
    }

    pub fn includes(&self, schema: &str) -> bool {
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(schema) {
                return false;
            }
        }
        if let Some(include) = &self.include {
            return include.is_match(schema);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_filter_accepts_everything() {
        let filter = SchemaFilter::default();
        assert!(filter.includes("app"));
        assert!(filter.includes("audit"));
    }

    #[test]
    fn include_must_match_when_set() {
        let filter = SchemaFilter::from_patterns("^app$", "").unwrap();
        assert!(filter.includes("app"));
        assert!(!filter.includes("app_shadow"));
        assert!(!filter.includes("audit"));
    }

    #[test]
    fn exclude_wins_over_include() {
        let filter = SchemaFilter::from_patterns("^a", "^audit$").unwrap();
        assert!(filter.includes("app"));
        assert!(!filter.includes("audit"));
    }
}
