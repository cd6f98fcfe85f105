//! RPC Method Implementations
//!
//! Each method corresponds to a JSON-RPC call that external apps can make.
//! Every method reads through the node facade; none holds a lock across
//! calls.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::crypto::Hash;
use crate::node::Node;
use crate::peg::PegProjection;

pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const OUT_OF_RANGE: i32 = -8;
pub const NOT_FOUND: i32 = -5;

/// JSON-RPC 2.0 Request
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    pub method: String,
    pub params: Option<Value>,
    #[serde(default)]
    pub id: Value,
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub result: Option<Value>,
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

/// JSON-RPC Error
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Value, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError { code, message }),
            id,
        }
    }
}

/// RPC Handler State
#[derive(Debug, Clone)]
pub struct RpcState {
    pub node: Arc<Node>,
}

/// Process a JSON-RPC request and return a response
pub fn handle_request(state: &RpcState, request: JsonRpcRequest) -> JsonRpcResponse {
    let node = &state.node;
    let id = request.id;
    let params = request.params;
    match request.method.as_str() {
        "getblockcount" => JsonRpcResponse::success(id, json!(node.num_blocks())),
        "getbestblockhash" => JsonRpcResponse::success(id, json!(node.best_block_hash().to_hex())),
        "getblockhash" => get_block_hash(node, id, params),
        "getblockheader" => get_block_header(node, id, params),
        "getblock" => get_block(node, id, params),
        "getblockchaininfo" => get_blockchain_info(node, id),
        "getpeginfo" => get_peg_info(node, id),
        "getpegvotes" => get_peg_votes(node, id),
        "getconnectioncount" => JsonRpcResponse::success(id, json!(node.num_connections())),
        "getpeerinfo" => get_peer_info(node, id),
        "getnettotals" => get_net_totals(node, id),
        "getalerts" => get_alerts(node, id),
        "getwarnings" => JsonRpcResponse::success(id, json!(node.status_bar_warnings())),
        _ => JsonRpcResponse::error(
            id,
            METHOD_NOT_FOUND,
            format!("Method not found: {}", request.method),
        ),
    }
}

/// First positional argument, or the bare value.
fn first_param(params: Option<Value>) -> Option<Value> {
    match params {
        Some(Value::Array(mut arr)) if !arr.is_empty() => Some(arr.swap_remove(0)),
        Some(Value::Array(_)) | None => None,
        Some(other) => Some(other),
    }
}

fn hash_param(params: Option<Value>) -> Result<Hash, String> {
    let raw = first_param(params).ok_or("Invalid params: expected block hash")?;
    let hex = raw.as_str().ok_or("Invalid params: block hash must be a string")?;
    Hash::from_hex(hex).map_err(|e| format!("Invalid params: {}", e))
}

fn projection_json(projection: PegProjection) -> Value {
    json!({
        "value": projection.value(),
        "committed": projection.is_committed(),
    })
}

/// Returns the block hash at a given height
fn get_block_hash(node: &Node, id: Value, params: Option<Value>) -> JsonRpcResponse {
    let Some(height) = first_param(params).and_then(|v| v.as_u64()) else {
        return JsonRpcResponse::error(id, INVALID_PARAMS, "Invalid params: expected height".into());
    };

    match node.block_hash(height) {
        Some(hash) => JsonRpcResponse::success(id, json!(hash.to_hex())),
        None => JsonRpcResponse::error(id, OUT_OF_RANGE, format!("Block height {} out of range", height)),
    }
}

/// Returns the index entry for a known header
fn get_block_header(node: &Node, id: Value, params: Option<Value>) -> JsonRpcResponse {
    let hash = match hash_param(params) {
        Ok(hash) => hash,
        Err(message) => return JsonRpcResponse::error(id, INVALID_PARAMS, message),
    };
    let Some(entry) = node.block_entry(&hash) else {
        return JsonRpcResponse::error(id, NOT_FOUND, "Block not found".into());
    };

    JsonRpcResponse::success(
        id,
        json!({
            "hash": entry.hash.to_hex(),
            "height": entry.height,
            "version": entry.header.version,
            "previousblockhash": entry.header.prev_hash.to_hex(),
            "merkleroot": entry.header.merkle_root.to_hex(),
            "time": entry.header.timestamp,
            "bits": format!("{:08x}", entry.header.bits),
            "nonce": entry.header.nonce,
            "chainwork": format!("{:#x}", entry.chain_work),
            "status": format!("{:?}", entry.status),
            "hasdata": entry.has_data,
            "onactivechain": node.is_on_active_chain(&hash),
            "supplyindex": entry.peg.map(|peg| peg.supply_index),
        }),
    )
}

/// Returns block contents by hash
fn get_block(node: &Node, id: Value, params: Option<Value>) -> JsonRpcResponse {
    let hash = match hash_param(params) {
        Ok(hash) => hash,
        Err(message) => return JsonRpcResponse::error(id, INVALID_PARAMS, message),
    };
    let (Some(block), Some(entry)) = (node.block(&hash), node.block_entry(&hash)) else {
        return JsonRpcResponse::error(id, NOT_FOUND, "Block not found".into());
    };

    let txids: Vec<String> = block.transactions.iter().map(|tx| tx.hash().to_hex()).collect();
    JsonRpcResponse::success(
        id,
        json!({
            "hash": hash.to_hex(),
            "height": entry.height,
            "previousblockhash": block.header.prev_hash.to_hex(),
            "time": block.header.timestamp,
            "pegvote": block.peg_vote.as_str(),
            "tx": txids,
        }),
    )
}

fn get_blockchain_info(node: &Node, id: Value) -> JsonRpcResponse {
    let snapshot = node.snapshot();
    JsonRpcResponse::success(
        id,
        json!({
            "chain": node.params().network.name(),
            "version": crate::constants::CLIENT_VERSION,
            "blocks": snapshot.height,
            "bestblockhash": snapshot.tip_hash.to_hex(),
            "time": snapshot.tip_time,
            "chainwork": format!("{:#x}", snapshot.chain_work),
            "initialblockdownload": node.in_initial_block_download(),
            "importing": node.is_importing(),
            "blocksatstartup": node.num_blocks_at_startup(),
            "startuptime": node.client_startup_time(),
        }),
    )
}

fn get_peg_info(node: &Node, id: Value) -> JsonRpcResponse {
    let snapshot = node.snapshot();
    JsonRpcResponse::success(
        id,
        json!({
            "pegstartblock": snapshot.peg_start_height,
            "intervalstart": snapshot.interval_start,
            "supplyindex": snapshot.supply_index,
            "nextsupplyindex": projection_json(snapshot.next_supply_index),
            "nextnextsupplyindex": projection_json(snapshot.next_next_supply_index),
            "votes": {
                "inflate": snapshot.votes.inflate,
                "deflate": snapshot.votes.deflate,
                "nochange": snapshot.votes.nochange,
            },
        }),
    )
}

fn get_peg_votes(node: &Node, id: Value) -> JsonRpcResponse {
    let votes = node.peg_votes();
    JsonRpcResponse::success(
        id,
        json!({
            "inflate": votes.inflate,
            "deflate": votes.deflate,
            "nochange": votes.nochange,
        }),
    )
}

fn get_peer_info(node: &Node, id: Value) -> JsonRpcResponse {
    let peers: Vec<Value> = node
        .connections()
        .into_iter()
        .map(|peer| {
            json!({
                "addr": peer.addr_name,
                "version": peer.protocol_version,
                "subver": peer.user_agent,
                "startingheight": peer.starting_height,
            })
        })
        .collect();
    JsonRpcResponse::success(id, Value::Array(peers))
}

fn get_net_totals(node: &Node, id: Value) -> JsonRpcResponse {
    JsonRpcResponse::success(
        id,
        json!({
            "totalbytesrecv": node.total_bytes_recv(),
            "totalbytessent": node.total_bytes_sent(),
        }),
    )
}

fn get_alerts(node: &Node, id: Value) -> JsonRpcResponse {
    let alerts: Vec<Value> = node
        .active_alerts()
        .into_iter()
        .map(|alert| {
            json!({
                "hash": alert.hash.to_hex(),
                "priority": alert.payload.priority,
                "expiration": alert.payload.expiration,
                "statusbar": alert.payload.status_bar,
            })
        })
        .collect();
    JsonRpcResponse::success(id, Value::Array(alerts))
}
