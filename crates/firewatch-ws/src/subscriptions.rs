use firewatch_core::types::{CollectionQuery, Document};
use serde_json::{json, Value};

/// Wrap params into a request frame the gateway acks by `req_id`.
pub fn request(method: &str, req_id: u64, params: Value) -> Value {
    json!({
        "method": method,
        "req_id": req_id,
        "params": params
    })
}

pub fn auth_params(
    api_key: &str,
    project_id: &str,
    app_id: Option<&str>,
    auth_domain: Option<&str>,
) -> Value {
    let mut params = json!({
        "api_key": api_key,
        "project_id": project_id
    });
    if let Some(app_id) = app_id {
        params["app_id"] = json!(app_id);
    }
    if let Some(domain) = auth_domain {
        params["auth_domain"] = json!(domain);
    }
    params
}

/// Listen params. A resume token asks the gateway to send only what changed
/// since that point instead of a fresh snapshot.
pub fn listen_params(query: &CollectionQuery, resume_token: Option<&str>) -> Value {
    let mut params = json!({
        "collection": query.collection,
        "order_by": query.order_by,
        "direction": query.direction
    });
    if let Some(token) = resume_token {
        params["resume_token"] = json!(token);
    }
    params
}

pub fn create_params(collection: &str, data: &Document) -> Value {
    json!({
        "collection": collection,
        "data": data
    })
}

pub fn update_params(collection: &str, id: &str, fields: &Document) -> Value {
    json!({
        "collection": collection,
        "id": id,
        "fields": fields
    })
}

pub fn unlisten(collection: &str) -> Value {
    json!({
        "method": "unlisten",
        "params": {
            "collection": collection
        }
    })
}

pub fn ping() -> Value {
    json!({
        "method": "ping"
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_frame() {
        let query = CollectionQuery::fire_reports("fireReports");
        let frame = request("listen", 7, listen_params(&query, Some("tok-3")));

        assert_eq!(frame["method"], "listen");
        assert_eq!(frame["req_id"], 7);
        assert_eq!(frame["params"]["order_by"], "dateTime");
        assert_eq!(frame["params"]["direction"], "desc");
        assert_eq!(frame["params"]["resume_token"], "tok-3");
    }

    #[test]
    fn test_auth_omits_missing_fields() {
        let params = auth_params("key", "proj", None, Some("proj.example.com"));
        assert_eq!(params["api_key"], "key");
        assert!(params.get("app_id").is_none());
        assert_eq!(params["auth_domain"], "proj.example.com");
    }
}
