//! Raw decoded contract events as delivered by the block watcher.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Block metadata attached to every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    pub number: u64,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
}

/// A single named event parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventParam {
    pub name: String,
    pub value: Value,
}

impl EventParam {
    pub fn new(name: &str, value: impl Into<Value>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
        }
    }
}

/// A decoded log entry inside a block batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Address of the emitting contract.
    pub address: String,
    /// Event name, optionally qualified as `Contract.Event`.
    pub name: String,
    #[serde(default)]
    pub params: Vec<EventParam>,
}

/// A raw event ready for reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub address: String,
    pub name: String,
    pub block: BlockMeta,
    pub params: Vec<EventParam>,
}

impl RawEvent {
    /// Look up a parameter by name. The last occurrence wins.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params
            .iter()
            .rev()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }

    /// Event name without any `Contract.` qualifier.
    pub fn short_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

/// All decoded logs of one block, in log order.
///
/// A block is delivered as exactly one batch. Once a block is checkpointed,
/// any later batch with the same number is skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockBatch {
    pub number: u64,
    pub timestamp: i64,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

impl BlockBatch {
    pub fn meta(&self) -> BlockMeta {
        BlockMeta {
            number: self.number,
            timestamp: self.timestamp,
        }
    }

    /// Expand the batch into raw events carrying the block metadata.
    pub fn events(&self) -> Vec<RawEvent> {
        let block = self.meta();
        self.logs
            .iter()
            .map(|log| RawEvent {
                address: log.address.clone(),
                name: log.name.clone(),
                block,
                params: log.params.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_block_batch() {
        let line = r#"{"number":42,"timestamp":1500000000,"logs":[
            {"address":"0x1111111111111111111111111111111111111111",
             "name":"CentralizedOracleFactory.CentralizedOracleCreation",
             "params":[{"name":"ipfsHash","value":"Qm123"}]}]}"#;
        let batch: BlockBatch = serde_json::from_str(line).unwrap();
        let events = batch.events();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].block.number, 42);
        assert_eq!(events[0].short_name(), "CentralizedOracleCreation");
        assert_eq!(events[0].param("ipfsHash"), Some(&json!("Qm123")));
    }

    #[test]
    fn test_param_last_occurrence_wins() {
        let event = RawEvent {
            address: String::new(),
            name: "OutcomeTokenCreation".to_string(),
            block: BlockMeta {
                number: 1,
                timestamp: 0,
            },
            params: vec![EventParam::new("index", 0), EventParam::new("index", 1)],
        };
        assert_eq!(event.param("index"), Some(&json!(1)));
        assert_eq!(event.param("missing"), None);
        assert_eq!(event.short_name(), "OutcomeTokenCreation");
    }
}
