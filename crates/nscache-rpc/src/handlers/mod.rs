//! Request handlers: the JSON-RPC admin interface and S3-style routes.

pub mod s3;

use crate::server::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use nscache_core::{BucketId, CreateBucketRequest, Gateway, GatewayError, HubResourceSpec};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, warn};

// ============================================================================
// JSON-RPC types
// ============================================================================

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 error structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }
}

/// Standard JSON-RPC code for an unknown method.
const METHOD_NOT_FOUND: i32 = -32601;

// ============================================================================
// Typed methods
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct NoParams {}

#[derive(Debug, Deserialize)]
pub struct ResourceParams {
    #[serde(alias = "resource", alias = "resourceName")]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct BucketParams {
    #[serde(alias = "name", alias = "bucketName")]
    pub bucket: String,
}

#[derive(Debug, Deserialize)]
pub struct BucketIdParams {
    #[serde(alias = "bucketId")]
    pub bucket_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ObjectParams {
    #[serde(alias = "bucketName")]
    pub bucket: String,
    #[serde(alias = "objectKey")]
    pub key: String,
}

/// `create_bucket` accepts either one hub resource or an ordered list.
#[derive(Debug, Deserialize)]
pub struct CreateBucketParams {
    pub name: String,
    #[serde(default, alias = "hubResource")]
    pub hub_resource: Option<String>,
    #[serde(default, alias = "hubResources")]
    pub hub_resources: Vec<String>,
    #[serde(alias = "ttlMs")]
    pub ttl_ms: u64,
}

impl CreateBucketParams {
    fn into_request(self) -> Result<CreateBucketRequest, GatewayError> {
        let mut hub_resources = self.hub_resources;
        if let Some(hub) = self.hub_resource {
            if !hub_resources.contains(&hub) {
                hub_resources.insert(0, hub);
            }
        }
        if hub_resources.is_empty() {
            return Err(GatewayError::InvalidParams {
                message: "hub_resource or hub_resources is required".to_string(),
            });
        }
        Ok(CreateBucketRequest {
            name: self.name,
            hub_resources,
            ttl_ms: self.ttl_ms,
        })
    }
}

/// Every method the admin interface understands, with its parameters.
#[derive(Debug, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum RpcMethod {
    CreateHubResource(HubResourceSpec),
    DeleteHubResource(ResourceParams),
    ListHubResources(NoParams),
    CheckResourceHealth(ResourceParams),
    CreateBucket(CreateBucketParams),
    DeleteBucket(BucketIdParams),
    ReadBucket(BucketParams),
    ListBuckets(NoParams),
    ListObjects(BucketParams),
    ReadObjectMd(ObjectParams),
    EvictObject(ObjectParams),
    ClearBucketCache(BucketParams),
    GetStats(NoParams),
}

/// Why a request could not be decoded into an [`RpcMethod`].
#[derive(Debug)]
pub enum ParseError {
    UnknownMethod,
    InvalidParams(GatewayError),
}

impl RpcMethod {
    /// Decode a method name and its params.
    ///
    /// Missing or null params are read as an empty object. The method name
    /// is checked by serde against the enum variants.
    pub fn parse(method: &str, params: Option<Value>) -> Result<Self, ParseError> {
        let params = match params {
            None | Some(Value::Null) => json!({}),
            Some(params) => params,
        };
        serde_json::from_value(json!({ "method": method, "params": params })).map_err(|e| {
            let message = e.to_string();
            if message.contains(&format!("unknown variant `{}`", method)) {
                ParseError::UnknownMethod
            } else {
                ParseError::InvalidParams(GatewayError::InvalidParams {
                    message: format!("Invalid params for {}: {}", method, message),
                })
            }
        })
    }

    /// Run the method against the gateway.
    pub async fn dispatch(self, gateway: &Gateway) -> nscache_core::Result<Value> {
        match self {
            // ================================================================
            // Hub resources
            // ================================================================
            RpcMethod::CreateHubResource(spec) => {
                let info = gateway.create_hub_resource(spec).await?;
                Ok(serde_json::to_value(info)?)
            }
            RpcMethod::DeleteHubResource(p) => {
                gateway.delete_hub_resource(&p.name)?;
                Ok(json!({ "deleted": true }))
            }
            RpcMethod::ListHubResources(_) => {
                Ok(json!({ "resources": gateway.list_hub_resources() }))
            }
            RpcMethod::CheckResourceHealth(p) => {
                let info = gateway.check_resource_health(&p.name).await?;
                Ok(serde_json::to_value(info)?)
            }

            // ================================================================
            // Namespace buckets
            // ================================================================
            RpcMethod::CreateBucket(p) => {
                let request = p.into_request()?;
                let name = request.name.clone();
                let id = gateway.create_namespace_bucket_with(request).await?;
                Ok(json!({ "bucket_id": id, "name": name }))
            }
            RpcMethod::DeleteBucket(p) => {
                let id = BucketId::parse(&p.bucket_id)?;
                gateway.delete_namespace_bucket(&id)?;
                Ok(json!({ "deleted": true }))
            }
            RpcMethod::ReadBucket(p) => {
                let bucket = gateway.bucket_info(&p.bucket)?;
                Ok(serde_json::to_value(&*bucket)?)
            }
            RpcMethod::ListBuckets(_) => {
                let buckets: Vec<_> = gateway
                    .list_namespace_buckets()
                    .iter()
                    .map(|b| (**b).clone())
                    .collect();
                Ok(json!({ "buckets": buckets }))
            }

            // ================================================================
            // Cached objects
            // ================================================================
            RpcMethod::ListObjects(p) => {
                let objects = gateway.list_cached_objects(&p.bucket)?;
                Ok(json!({ "objects": objects }))
            }
            RpcMethod::ReadObjectMd(p) => {
                let info = gateway.head_object(&p.bucket, &p.key)?;
                Ok(serde_json::to_value(info)?)
            }
            RpcMethod::EvictObject(p) => {
                let evicted = gateway.evict_object(&p.bucket, &p.key)?;
                Ok(json!({ "evicted": evicted }))
            }
            RpcMethod::ClearBucketCache(p) => {
                let cleared = gateway.clear_bucket_cache(&p.bucket)?;
                Ok(json!({ "cleared": cleared }))
            }
            RpcMethod::GetStats(_) => Ok(serde_json::to_value(gateway.stats()?)?),
        }
    }
}

// ============================================================================
// HTTP handlers
// ============================================================================

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}

/// Main JSON-RPC handler.
pub async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let id = request.id.clone();
    debug!("RPC call: {}({:?})", request.method, request.params);

    let result = match RpcMethod::parse(&request.method, request.params) {
        Ok(method) => method.dispatch(&state.gateway).await,
        Err(ParseError::UnknownMethod) => {
            warn!("Unknown RPC method: {}", request.method);
            return (
                StatusCode::OK,
                Json(JsonRpcResponse::error(
                    id,
                    METHOD_NOT_FOUND,
                    format!("Method not found: {}", request.method),
                )),
            );
        }
        Err(ParseError::InvalidParams(e)) => Err(e),
    };

    match result {
        Ok(value) => (StatusCode::OK, Json(JsonRpcResponse::success(id, value))),
        Err(e) => {
            if e.is_not_found() {
                debug!("RPC {}: {}", request.method, e);
            } else {
                error!("RPC error for {}: {}", request.method, e);
            }
            (
                StatusCode::OK,
                Json(JsonRpcResponse::error(id, e.to_rpc_error_code(), e.to_string())),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_methods_are_recognised() {
        let names = [
            "create_hub_resource",
            "delete_hub_resource",
            "list_hub_resources",
            "check_resource_health",
            "create_bucket",
            "delete_bucket",
            "read_bucket",
            "list_buckets",
            "list_objects",
            "read_object_md",
            "evict_object",
            "clear_bucket_cache",
            "get_stats",
        ];
        for name in names {
            // Methods with required params fail on the empty object, but
            // never as an unknown method.
            assert!(
                !matches!(RpcMethod::parse(name, None), Err(ParseError::UnknownMethod)),
                "{}",
                name
            );
        }
    }

    #[test]
    fn test_unknown_method_is_detected() {
        assert!(matches!(
            RpcMethod::parse("drop_everything", Some(json!({}))),
            Err(ParseError::UnknownMethod)
        ));
        // A bad param value that names a method is not an unknown method.
        assert!(matches!(
            RpcMethod::parse("list_objects", Some(json!({"bucket": 7}))),
            Err(ParseError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_parse_create_bucket_single_hub() {
        let Ok(method) = RpcMethod::parse(
            "create_bucket",
            Some(json!({"name": "ns1", "hubResource": "h1", "ttlMs": 60000})),
        ) else {
            panic!("create_bucket should parse");
        };
        let RpcMethod::CreateBucket(params) = method else {
            panic!("expected create_bucket");
        };
        let request = params.into_request().unwrap();
        assert_eq!(request.hub_resources, vec!["h1".to_string()]);
        assert_eq!(request.ttl_ms, 60000);
    }

    #[test]
    fn test_parse_create_bucket_requires_hub() {
        let Ok(method) =
            RpcMethod::parse("create_bucket", Some(json!({"name": "ns1", "ttl_ms": 1})))
        else {
            panic!("create_bucket should parse");
        };
        let RpcMethod::CreateBucket(params) = method else {
            panic!("expected create_bucket");
        };
        assert!(matches!(
            params.into_request(),
            Err(GatewayError::InvalidParams { .. })
        ));
    }

    #[test]
    fn test_missing_params_is_invalid_params() {
        let Err(ParseError::InvalidParams(err)) =
            RpcMethod::parse("read_object_md", Some(json!({"bucket": "ns1"})))
        else {
            panic!("missing key should be invalid params");
        };
        assert_eq!(err.to_rpc_error_code(), -32602);
    }

    #[test]
    fn test_null_params_for_list() {
        assert!(matches!(
            RpcMethod::parse("list_buckets", Some(Value::Null)),
            Ok(RpcMethod::ListBuckets(_))
        ));
    }
}
