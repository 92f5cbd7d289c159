//! Scheduled stake/unstake transactions.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::participant::ParticipantId;
use crate::pool::PoolId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Stake,
    Unstake,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Stake => "stake",
            ActionKind::Unstake => "unstake",
        }
    }
}

impl FromStr for ActionKind {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stake" | "buy" => Ok(ActionKind::Stake),
            "unstake" | "sell" => Ok(ActionKind::Unstake),
            other => Err(AmountParseError {
                msg: format!("unknown action kind '{}'", other),
            }),
        }
    }
}

/// How much of the available source balance an action moves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Amount {
    Absolute(f64),
    /// Percent of the available amount, `50.0` meaning half
    Percentage(f64),
    All,
}

impl Amount {
    /// Resolve against the balance available when the action executes.
    pub fn resolve(&self, available: f64) -> f64 {
        match *self {
            Amount::Absolute(v) => v,
            Amount::Percentage(pct) => available * pct / 100.0,
            Amount::All => available,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AmountParseError {
    pub msg: String,
}

impl fmt::Display for AmountParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for AmountParseError {}

impl FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Amount::All);
        }
        let (body, pct) = match s.strip_suffix('%') {
            Some(body) => (body.trim(), true),
            None => (s, false),
        };
        let value: f64 = body.parse().map_err(|_| AmountParseError {
            msg: format!("invalid amount '{}'", s),
        })?;
        Ok(if pct {
            Amount::Percentage(value)
        } else {
            Amount::Absolute(value)
        })
    }
}

impl TryFrom<String> for Amount {
    type Error = AmountParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        amount.to_string()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Amount::Absolute(v) => write!(f, "{}", v),
            Amount::Percentage(p) => write!(f, "{}%", p),
            Amount::All => write!(f, "all"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub block: u64,
    pub actor_id: ParticipantId,
    pub pool_id: PoolId,
    pub kind: ActionKind,
    pub amount: Amount,
}

impl Action {
    pub fn stake(block: u64, actor_id: ParticipantId, pool_id: PoolId, amount: Amount) -> Self {
        Self { block, actor_id, pool_id, kind: ActionKind::Stake, amount }
    }

    pub fn unstake(block: u64, actor_id: ParticipantId, pool_id: PoolId, amount: Amount) -> Self {
        Self { block, actor_id, pool_id, kind: ActionKind::Unstake, amount }
    }

    /// Build from the string form used in scenario files: `"all"`, `"50%"`, `"12.5"`.
    pub fn parse(
        block: u64,
        actor_id: ParticipantId,
        pool_id: PoolId,
        kind: &str,
        amount: &str,
    ) -> Result<Self, AmountParseError> {
        Ok(Self {
            block,
            actor_id,
            pool_id,
            kind: kind.parse()?,
            amount: amount.parse()?,
        })
    }
}

/// Group actions by block; order within a block follows input order.
pub fn schedule_by_block(actions: Vec<Action>) -> BTreeMap<u64, Vec<Action>> {
    let mut schedule: BTreeMap<u64, Vec<Action>> = BTreeMap::new();
    for action in actions {
        schedule.entry(action.block).or_default().push(action);
    }
    schedule
}

/// Why an action did not change state.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionError {
    UnknownParticipant(ParticipantId),
    UnknownPool(PoolId),
    InvalidAction { reason: String },
}

impl ActionError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        ActionError::InvalidAction { reason: reason.into() }
    }

    /// Unknown references are dropped silently; invalid actions are rejections.
    pub fn is_skip(&self) -> bool {
        matches!(self, ActionError::UnknownParticipant(_) | ActionError::UnknownPool(_))
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionError::UnknownParticipant(id) => write!(f, "unknown participant {}", id),
            ActionError::UnknownPool(id) => write!(f, "unknown pool {}", id),
            ActionError::InvalidAction { reason } => write!(f, "invalid action: {}", reason),
        }
    }
}

impl std::error::Error for ActionError {}

/// Amounts moved by an applied action: tao and alpha, signed from the
/// participant's point of view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trade {
    pub tao_delta: f64,
    pub alpha_delta: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub action: Action,
    pub result: Result<Trade, ActionError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amounts() {
        assert_eq!("all".parse::<Amount>().unwrap(), Amount::All);
        assert_eq!("ALL".parse::<Amount>().unwrap(), Amount::All);
        assert_eq!("50%".parse::<Amount>().unwrap(), Amount::Percentage(50.0));
        assert_eq!(" 12.5 % ".parse::<Amount>().unwrap(), Amount::Percentage(12.5));
        assert_eq!("123".parse::<Amount>().unwrap(), Amount::Absolute(123.0));
        assert!("lots".parse::<Amount>().is_err());
        assert!("%".parse::<Amount>().is_err());
    }

    #[test]
    fn test_resolve_against_available() {
        assert_eq!(Amount::All.resolve(80.0), 80.0);
        assert_eq!(Amount::Percentage(25.0).resolve(80.0), 20.0);
        assert_eq!(Amount::Absolute(3.0).resolve(80.0), 3.0);
    }

    #[test]
    fn test_kind_aliases() {
        assert_eq!("stake".parse::<ActionKind>().unwrap(), ActionKind::Stake);
        assert_eq!("buy".parse::<ActionKind>().unwrap(), ActionKind::Stake);
        assert_eq!("Unstake".parse::<ActionKind>().unwrap(), ActionKind::Unstake);
        assert!("transfer".parse::<ActionKind>().is_err());
    }

    #[test]
    fn test_amount_serde_uses_string_form() {
        let action = Action::parse(1, 2, 3, "stake", "50%").unwrap();
        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains("\"amount\":\"50%\""));
        let back: Action = serde_json::from_str(&json).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn test_schedule_preserves_order() {
        let actions = vec![
            Action::stake(2, 1, 1, Amount::Absolute(1.0)),
            Action::stake(1, 2, 1, Amount::All),
            Action::unstake(2, 3, 1, Amount::Percentage(10.0)),
        ];
        let schedule = schedule_by_block(actions);
        assert_eq!(schedule.len(), 2);
        let block2 = &schedule[&2];
        assert_eq!(block2[0].actor_id, 1);
        assert_eq!(block2[1].actor_id, 3);
    }

    #[test]
    fn test_error_classification() {
        assert!(ActionError::UnknownPool(4).is_skip());
        assert!(!ActionError::invalid("too much").is_skip());
        assert_eq!(ActionError::UnknownParticipant(9).to_string(), "unknown participant 9");
    }
}
