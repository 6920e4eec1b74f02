use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::{Block, Transaction};
use crate::error::{NodeError, Result};
use crate::utils::current_timestamp;

/// Gossip message kinds, tagged with their wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    #[serde(rename = "HANDSHAKE")]
    Handshake,
    #[serde(rename = "REQUEST_CHAIN")]
    RequestChain,
    #[serde(rename = "RECEIVE_CHAIN")]
    ReceiveChain,
    #[serde(rename = "REQUEST_LATEST")]
    RequestLatest,
    #[serde(rename = "RECEIVE_LATEST")]
    ReceiveLatest,
    #[serde(rename = "NEW_TRANSACTION")]
    NewTransaction,
    #[serde(rename = "NEW_BLOCK")]
    NewBlock,
    #[serde(rename = "PING")]
    Ping,
    #[serde(rename = "PONG")]
    Pong,
}

/// One frame on the peer wire: `{type, data, timestamp}` as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub data: Value,
    pub timestamp: i64,
}

/// First frame after connect in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakePayload {
    pub chain_height: u64,
    pub node_info: String,
}

impl Message {
    pub fn new(kind: MessageKind, data: Value) -> Message {
        Message {
            kind,
            data,
            timestamp: current_timestamp().unwrap_or_default(),
        }
    }

    pub fn handshake(chain_height: u64, node_info: &str) -> Result<Message> {
        let payload = HandshakePayload {
            chain_height,
            node_info: node_info.to_string(),
        };
        Ok(Message::new(
            MessageKind::Handshake,
            serde_json::to_value(payload)?,
        ))
    }

    pub fn request_chain() -> Message {
        Message::new(MessageKind::RequestChain, json!({}))
    }

    pub fn receive_chain(blocks: &[Block]) -> Result<Message> {
        Ok(Message::new(
            MessageKind::ReceiveChain,
            serde_json::to_value(blocks)?,
        ))
    }

    pub fn request_latest() -> Message {
        Message::new(MessageKind::RequestLatest, json!({}))
    }

    pub fn receive_latest(block: &Block) -> Result<Message> {
        Ok(Message::new(
            MessageKind::ReceiveLatest,
            serde_json::to_value(block)?,
        ))
    }

    pub fn new_transaction(tx: &Transaction) -> Result<Message> {
        Ok(Message::new(
            MessageKind::NewTransaction,
            serde_json::to_value(tx)?,
        ))
    }

    pub fn new_block(block: &Block) -> Result<Message> {
        Ok(Message::new(
            MessageKind::NewBlock,
            serde_json::to_value(block)?,
        ))
    }

    pub fn ping() -> Message {
        let ts = current_timestamp().unwrap_or_default();
        Message::new(MessageKind::Ping, json!({ "timestamp": ts }))
    }

    pub fn pong() -> Message {
        let ts = current_timestamp().unwrap_or_default();
        Message::new(MessageKind::Pong, json!({ "timestamp": ts }))
    }

    /// Decode the payload into the type the message kind implies.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| NodeError::Malformed(format!("Bad {:?} payload: {e}", self.kind)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Keypair;

    #[test]
    fn test_wire_tags_are_screaming_snake() {
        let msg = Message::request_chain();
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"REQUEST_CHAIN""#));

        let msg = Message::ping();
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"PING""#));
    }

    #[test]
    fn test_handshake_round_trip() {
        let msg = Message::handshake(7, "cosmos-chain/0.1.0").unwrap();
        let json = serde_json::to_string(&msg).unwrap();
        let decoded: Message = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded.kind, MessageKind::Handshake);
        let payload: HandshakePayload = decoded.payload().unwrap();
        assert_eq!(payload.chain_height, 7);
        assert_eq!(payload.node_info, "cosmos-chain/0.1.0");
    }

    #[test]
    fn test_transaction_payload_round_trip() {
        let sender = Keypair::generate();
        let recipient = Keypair::generate();
        let mut tx =
            Transaction::transfer(&sender.address(), &recipient.address(), 10, 1).unwrap();
        tx.sign(&sender).unwrap();

        let msg = Message::new_transaction(&tx).unwrap();
        let json = serde_json::to_string(&msg).unwrap();
        let decoded: Message = serde_json::from_str(&json).unwrap();
        let restored: Transaction = decoded.payload().unwrap();
        assert_eq!(restored, tx);
    }

    #[test]
    fn test_wrong_payload_shape_is_malformed() {
        let msg = Message::new(MessageKind::ReceiveChain, json!({"nope": true}));
        assert!(msg.payload::<Vec<Block>>().is_err());
    }
}
