use serde::{Deserialize, Serialize};

use crate::models::common::FilterConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConstraint {
    pub account_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventConstraint {
    pub standard: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<AccountConstraint>>,
}

/// Server-side subscription criteria sent with every subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub status: String,
    pub account_id: String,
    pub event: EventConstraint,
}

impl FilterSpec {
    pub fn actor_account(&self) -> Option<&str> {
        self.event
            .data
            .as_ref()
            .and_then(|data| data.first())
            .map(|constraint| constraint.account_id.as_str())
    }
}

/// Immutable source of every [`FilterSpec`]. Filters are always built fresh from the template,
/// never patched in place, so a cleared actor account cannot linger.
#[derive(Debug, Clone)]
pub struct FilterTemplate {
    base: FilterSpec,
}

impl FilterTemplate {
    pub fn new(status: &str, contract_id: &str, standard: &str) -> Self {
        Self {
            base: FilterSpec {
                status: status.to_string(),
                account_id: contract_id.to_string(),
                event: EventConstraint {
                    standard: standard.to_string(),
                    data: None,
                },
            },
        }
    }

    pub fn from_config(config: &FilterConfig) -> Self {
        Self::new(&config.status, &config.contract_id, &config.standard)
    }

    pub fn build(&self, actor_account: Option<&str>) -> FilterSpec {
        let mut filter = self.base.clone();
        if let Some(account_id) = actor_account.map(str::trim).filter(|a| !a.is_empty()) {
            filter.event.data = Some(vec![AccountConstraint {
                account_id: account_id.to_string(),
            }]);
        }
        filter
    }
}

impl Default for FilterTemplate {
    fn default() -> Self {
        Self::from_config(&FilterConfig::default())
    }
}

/// Sent once per successful connection open.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionRequest<'a> {
    pub secret: &'a str,
    pub filter: &'a FilterSpec,
    pub fetch_past_events: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_filter_serializes_without_data() {
        let filter = FilterTemplate::default().build(None);
        assert_eq!(
            serde_json::to_value(&filter).unwrap(),
            json!({
                "status": "SUCCESS",
                "account_id": "contract.main.burrow.near",
                "event": { "standard": "burrow" }
            })
        );
    }

    #[test]
    fn test_actor_filter_adds_data_constraint() {
        let filter = FilterTemplate::default().build(Some("alice.near"));
        assert_eq!(filter.actor_account(), Some("alice.near"));
        assert_eq!(
            serde_json::to_value(&filter).unwrap()["event"]["data"],
            json!([{ "account_id": "alice.near" }])
        );
    }

    #[test]
    fn test_rebuild_after_clearing_drops_actor() {
        let template = FilterTemplate::default();
        let narrowed = template.build(Some("alice.near"));
        assert_eq!(narrowed.actor_account(), Some("alice.near"));

        let cleared = template.build(Some(""));
        assert_eq!(cleared.actor_account(), None);
        assert_eq!(cleared, template.build(None));
        assert!(!serde_json::to_string(&cleared).unwrap().contains("alice.near"));
    }

    #[test]
    fn test_subscription_request_shape() {
        let filter = FilterTemplate::default().build(Some("bob.near"));
        let request = SubscriptionRequest {
            secret: "brrr",
            filter: &filter,
            fetch_past_events: 50,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["secret"], "brrr");
        assert_eq!(value["fetch_past_events"], 50);
        assert_eq!(value["filter"]["status"], "SUCCESS");
        assert_eq!(value["filter"]["event"]["data"][0]["account_id"], "bob.near");
    }
}
