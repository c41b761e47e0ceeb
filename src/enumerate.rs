use serde_json::Value;
use tracing::debug;

use crate::domain::{RecordIdentifierSet, ResourceUrl};
use crate::error::AgsError;
use crate::service::FeatureService;

// The ids-only query ignores maxRecordCount, so one request covers the layer.
pub fn enumerate_ids<S: FeatureService + ?Sized>(
    service: &S,
    layer: &ResourceUrl,
) -> Result<RecordIdentifierSet, AgsError> {
    let params = vec![
        ("returnIdsOnly", "true".to_string()),
        ("where", "1=1".to_string()),
        ("f", "json".to_string()),
    ];
    let body = match service.get_json(&layer.query_endpoint(), &params) {
        Ok(body) => body,
        Err(AgsError::ServiceStatus { status, message }) => {
            return Err(AgsError::IdentifierQueryFailed(format!(
                "status {status}: {message}"
            )));
        }
        Err(err) => return Err(err),
    };
    let ids = parse_id_response(&body)?;
    debug!(layer = %layer, count = ids.len(), field = ids.field_name(), "enumerated ids");
    Ok(ids)
}

pub fn parse_id_response(body: &Value) -> Result<RecordIdentifierSet, AgsError> {
    let field = body
        .get("objectIdFieldName")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AgsError::IdentifierQueryFailed("missing objectIdFieldName".to_string()))?;

    let ids = match body.get("objectIds") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(values)) => values
            .iter()
            .map(|value| {
                value.as_i64().ok_or_else(|| {
                    AgsError::IdentifierQueryFailed(format!("non-integer object id: {value}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(other) => {
            return Err(AgsError::IdentifierQueryFailed(format!(
                "objectIds is not an array: {other}"
            )));
        }
    };

    Ok(RecordIdentifierSet::new(field, ids))
}
