use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

////////////////////////////////////// Wire Data ////////////////////////////////////////
// Raw event after key conversion to camelCase. Only read during normalization.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub block_timestamp: Option<Value>,
    pub block_height: Option<Value>,
    pub receipt_id: Option<String>,
    pub event: Option<RawEventBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEventBody {
    pub standard: Option<String>,
    pub version: Option<String>,
    pub event: Option<String>,
    #[serde(default)]
    pub data: Vec<Value>,
}

/// Inbound frame. Frames without an `events` field carry nothing for the feed.
#[derive(Debug, Deserialize)]
pub struct InboundFrame {
    pub events: Option<Vec<Value>>,
}

/////////////////////////////////// Normalized Data ///////////////////////////////////
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    Deposit,
    DepositToReserve,
    WithdrawStarted,
    WithdrawFailed,
    WithdrawSucceeded,
    IncreaseCollateral,
    DecreaseCollateral,
    Borrow,
    Repay,
    Liquidate,
    ForceClose,
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Deposit => "deposit",
            Self::DepositToReserve => "deposit_to_reserve",
            Self::WithdrawStarted => "withdraw_started",
            Self::WithdrawFailed => "withdraw_failed",
            Self::WithdrawSucceeded => "withdraw_succeeded",
            Self::IncreaseCollateral => "increase_collateral",
            Self::DecreaseCollateral => "decrease_collateral",
            Self::Borrow => "borrow",
            Self::Repay => "repay",
            Self::Liquidate => "liquidate",
            Self::ForceClose => "force_close",
            Self::Other(name) => name,
        }
    }

    // Kinds whose data describes a liquidated position rather than a token movement
    pub fn is_liquidation(&self) -> bool {
        matches!(self, Self::Liquidate | Self::ForceClose)
    }
}

impl From<&str> for EventKind {
    fn from(name: &str) -> Self {
        match name {
            "deposit" => Self::Deposit,
            "deposit_to_reserve" => Self::DepositToReserve,
            "withdraw_started" => Self::WithdrawStarted,
            "withdraw_failed" => Self::WithdrawFailed,
            "withdraw_succeeded" => Self::WithdrawSucceeded,
            "increase_collateral" => Self::IncreaseCollateral,
            "decrease_collateral" => Self::DecreaseCollateral,
            "borrow" => Self::Borrow,
            "repay" => Self::Repay,
            "liquidate" => Self::Liquidate,
            "force_close" => Self::ForceClose,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for EventKind {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EventPayload {
    Liquidation {
        liquidation_account_id: Option<String>,
        collateral_sum: Option<String>,
        repaid_sum: Option<String>,
    },
    TokenAmount {
        token_id: Option<String>,
        amount: Option<String>,
    },
}

impl EventPayload {
    /// Builds the typed payload from the first (camelCase) data entry of an event.
    pub fn from_data(kind: &EventKind, data: &Value) -> Self {
        if kind.is_liquidation() {
            Self::Liquidation {
                liquidation_account_id: string_field(data, "liquidationAccountId"),
                collateral_sum: string_field(data, "collateralSum"),
                repaid_sum: string_field(data, "repaidSum"),
            }
        } else {
            Self::TokenAmount {
                token_id: string_field(data, "tokenId"),
                amount: string_field(data, "amount"),
            }
        }
    }

    /// Liquidator profit in USD: collateral sum minus repaid sum.
    pub fn profit(&self) -> Option<f64> {
        match self {
            Self::Liquidation {
                collateral_sum: Some(collateral),
                repaid_sum: Some(repaid),
                ..
            } => {
                let collateral = collateral.parse::<f64>().ok()?;
                let repaid = repaid.parse::<f64>().ok()?;
                Some(collateral - repaid)
            }
            _ => None,
        }
    }
}

// Amounts arrive as decimal strings, but tolerate plain JSON numbers too
fn string_field(data: &Value, key: &str) -> Option<String> {
    match data.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    pub sequence_index: u64,
    pub occurred_at: DateTime<Utc>,
    pub actor_account_id: String,
    pub kind: EventKind,
    pub payload: EventPayload,
    // First data entry with camelCase keys
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_id: Option<String>,
}

impl NormalizedEvent {
    pub fn token_id_or<'a>(&'a self, default_token_id: &'a str) -> &'a str {
        match &self.payload {
            EventPayload::TokenAmount {
                token_id: Some(token_id),
                ..
            } => token_id,
            _ => default_token_id,
        }
    }

    pub fn amount_or_zero(&self) -> &str {
        match &self.payload {
            EventPayload::TokenAmount {
                amount: Some(amount),
                ..
            } => amount,
            _ => "0",
        }
    }
}
