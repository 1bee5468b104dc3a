//! Standard response envelope: `{ data, meta: { count, page }, errors? }`.

use crate::query::PageInfo;
use crate::service::{FieldError, ListResult, SingleResult};
use axum::{http::StatusCode, Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct Envelope<T> {
    pub data: T,
    pub meta: Meta,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

#[derive(Serialize, Default)]
pub struct Meta {
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<PageInfo>,
}

pub fn success_one<T: Serialize>(data: T) -> (StatusCode, Json<Envelope<T>>) {
    (
        StatusCode::OK,
        Json(Envelope {
            data,
            meta: Meta { count: 1, page: None },
            errors: Vec::new(),
        }),
    )
}

pub fn success_many<T: Serialize>(data: Vec<T>) -> (StatusCode, Json<Envelope<Vec<T>>>) {
    let count = data.len() as u64;
    (
        StatusCode::OK,
        Json(Envelope {
            data,
            meta: Meta { count, page: None },
            errors: Vec::new(),
        }),
    )
}

pub fn list_response(result: ListResult) -> (StatusCode, Json<Envelope<Vec<serde_json::Value>>>) {
    let count = result.data.len() as u64;
    (
        StatusCode::OK,
        Json(Envelope {
            data: result.data,
            meta: Meta {
                count,
                page: Some(result.page),
            },
            errors: result.errors,
        }),
    )
}

pub fn single_response(result: SingleResult) -> (StatusCode, Json<Envelope<serde_json::Value>>) {
    (
        StatusCode::OK,
        Json(Envelope {
            data: result.data,
            meta: Meta { count: 1, page: None },
            errors: result.errors,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn list_envelope_carries_page_and_field_errors() {
        let result = ListResult {
            data: vec![json!({"id": 1})],
            page: PageInfo {
                has_previous: false,
                has_next: true,
                first: None,
                last: Some("abc".into()),
            },
            errors: vec![FieldError {
                path: "owner".into(),
                code: "resolution_error".into(),
                message: "m".into(),
            }],
        };
        let (status, Json(body)) = list_response(result);
        assert_eq!(status, StatusCode::OK);
        let v = serde_json::to_value(body).unwrap();
        assert_eq!(v["meta"], json!({"count": 1, "page": {"hasPrevious": false, "hasNext": true, "last": "abc"}}));
        assert_eq!(v["errors"][0]["path"], "owner");
    }

    #[test]
    fn empty_errors_are_omitted() {
        let (_, Json(body)) = success_many(vec![1, 2]);
        let v = serde_json::to_value(body).unwrap();
        assert!(v.get("errors").is_none());
        assert_eq!(v["meta"]["count"], 2);
    }
}
