/// Metric labels shared by the resilience crates.
#[derive(Debug, Clone, Default)]
pub struct TelemetryLabels {
    pub provider: Option<String>,
    pub endpoint: Option<String>,
    pub extra: Vec<(&'static str, String)>,
}

impl TelemetryLabels {
    pub fn provider(provider: impl Into<String>) -> Self {
        Self {
            provider: Some(provider.into()),
            ..Default::default()
        }
    }

    pub fn endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            ..Default::default()
        }
    }

    pub fn with(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.extra.push((key, value.into()));
        self
    }

    pub fn tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = Vec::with_capacity(2 + self.extra.len());
        if let Some(provider) = &self.provider {
            tags.push(("provider", provider.clone()));
        }
        if let Some(endpoint) = &self.endpoint {
            tags.push(("endpoint", endpoint.clone()));
        }
        tags.extend(self.extra.iter().cloned());
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_keep_insertion_order() {
        let labels = TelemetryLabels::endpoint("graph:send")
            .with("outcome", "transient")
            .with("attempt", "2");
        assert_eq!(
            labels.tags(),
            vec![
                ("endpoint", "graph:send".to_string()),
                ("outcome", "transient".to_string()),
                ("attempt", "2".to_string()),
            ]
        );
    }

    #[test]
    fn provider_label_first() {
        let mut labels = TelemetryLabels::provider("gmail");
        labels.endpoint = Some("messages".into());
        let tags = labels.tags();
        assert_eq!(tags[0], ("provider", "gmail".to_string()));
        assert_eq!(tags[1], ("endpoint", "messages".to_string()));
    }
}
