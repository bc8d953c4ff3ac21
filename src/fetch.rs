//! Tushare Pro client for bank financial-statement endpoints.

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::catalog::RecordType;
use crate::config::TushareConfig;
use crate::error::{IngestError, IngestResult};
use crate::row::{Entity, Row};

/// Source of rows for one (entity, record type) cell.
///
/// Implementations return the full materialized history; an empty vector is a
/// valid answer.
pub trait Fetcher {
    fn fetch(&self, entity: &Entity, record_type: RecordType) -> IngestResult<Vec<Row>>;
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    api_name: &'a str,
    token: &'a str,
    params: HashMap<&'a str, serde_json::Value>,
    fields: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<ApiData>,
}

#[derive(Debug, Deserialize)]
struct ApiData {
    fields: Vec<String>,
    #[serde(default)]
    items: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    has_more: Option<bool>,
}

/// One decoded response; `has_more` means the provider truncated it
#[derive(Debug)]
struct Page {
    rows: Vec<Row>,
    has_more: bool,
}

pub struct TushareClient {
    client: Client,
    config: TushareConfig,
}

impl TushareClient {
    pub fn new(config: &TushareConfig) -> IngestResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| IngestError::configuration(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    fn request_body<'a>(
        &'a self,
        entity: &'a Entity,
        record_type: RecordType,
        offset: usize,
    ) -> ApiRequest<'a> {
        let mut params = HashMap::new();
        params.insert("ts_code", serde_json::Value::from(entity.code.as_str()));
        if offset > 0 {
            params.insert("offset", serde_json::Value::from(offset));
        }

        ApiRequest {
            api_name: record_type.api_name(),
            token: &self.config.token,
            params,
            fields: record_type.table().column_names().collect::<Vec<_>>().join(","),
        }
    }
}

impl Fetcher for TushareClient {
    fn fetch(&self, entity: &Entity, record_type: RecordType) -> IngestResult<Vec<Row>> {
        let fail = |message: String| IngestError::Fetch {
            entity: entity.code.clone(),
            record_type: record_type.api_name().to_string(),
            message,
        };

        collect_pages(|offset| {
            if offset > 0 {
                debug!(entity = %entity.code, record_type = %record_type, offset, "requesting next page");
            }

            let resp = self
                .client
                .post(&self.config.api_url)
                .json(&self.request_body(entity, record_type, offset))
                .send()
                .map_err(|e| format!("request failed: {e}"))?;

            if !resp.status().is_success() {
                return Err(format!("request failed with status {}", resp.status()));
            }

            resp.json()
                .map_err(|e| format!("failed to parse response: {e}"))
        })
        .map_err(fail)
    }
}

/// Request pages from offset 0 until the provider stops reporting `has_more`
fn collect_pages(
    mut request: impl FnMut(usize) -> Result<ApiResponse, String>,
) -> Result<Vec<Row>, String> {
    let mut rows = Vec::new();
    loop {
        let page = page_from_response(request(rows.len())?)?;
        let received = page.rows.len();
        rows.extend(page.rows);

        if !page.has_more {
            return Ok(rows);
        }
        if received == 0 {
            return Err(format!(
                "provider reported more rows after offset {} but sent none",
                rows.len()
            ));
        }
    }
}

fn page_from_response(body: ApiResponse) -> Result<Page, String> {
    if body.code != 0 {
        return Err(format!(
            "provider returned code {}: {}",
            body.code,
            body.msg.unwrap_or_default()
        ));
    }

    let Some(data) = body.data else {
        return Ok(Page {
            rows: Vec::new(),
            has_more: false,
        });
    };

    let mut rows = Vec::with_capacity(data.items.len());
    for (i, item) in data.items.iter().enumerate() {
        if item.len() != data.fields.len() {
            return Err(format!(
                "item {i} has {} values for {} fields",
                item.len(),
                data.fields.len()
            ));
        }
        rows.push(Row::from_columns(&data.fields, item));
    }
    Ok(Page {
        rows,
        has_more: data.has_more.unwrap_or(false),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Value;
    use serde_json::json;

    fn response(body: serde_json::Value) -> ApiResponse {
        serde_json::from_value(body).unwrap()
    }

    fn parse(body: serde_json::Value) -> Result<Vec<Row>, String> {
        page_from_response(response(body)).map(|page| page.rows)
    }

    fn page(dates: &[&str], has_more: bool) -> serde_json::Value {
        let items: Vec<serde_json::Value> = dates.iter().map(|d| json!(["601398.SH", d])).collect();
        json!({
            "code": 0,
            "data": {"fields": ["ts_code", "end_date"], "items": items, "has_more": has_more}
        })
    }

    #[test]
    fn decodes_items_against_fields() {
        let rows = parse(json!({
            "request_id": "abc",
            "code": 0,
            "msg": "",
            "data": {
                "fields": ["ts_code", "end_date", "n_income", "update_flag"],
                "items": [
                    ["601398.SH", "20231231", 3.6e11, "1"],
                    ["601398.SH", "20230930", null, "0"]
                ],
                "has_more": false
            }
        }))
        .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("n_income"), Some(&Value::Real(3.6e11)));
        assert_eq!(rows[1].get("n_income"), Some(&Value::Null));
    }

    #[test]
    fn empty_result_is_not_an_error() {
        let rows = parse(json!({
            "code": 0,
            "msg": "",
            "data": {"fields": ["ts_code", "end_date"], "items": []}
        }))
        .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn provider_error_code_is_reported() {
        let err = parse(json!({"code": 40203, "msg": "rate limited", "data": null})).unwrap_err();
        assert!(err.contains("40203"));
        assert!(err.contains("rate limited"));
    }

    #[test]
    fn ragged_item_is_rejected() {
        let err = parse(json!({
            "code": 0,
            "data": {"fields": ["ts_code", "end_date"], "items": [["601398.SH"]]}
        }))
        .unwrap_err();
        assert!(err.contains("item 0"));
    }

    #[test]
    fn truncated_page_is_flagged() {
        let page = page_from_response(response(page(&["20231231"], true))).unwrap();
        assert!(page.has_more);
        assert_eq!(page.rows.len(), 1);

        let last = page_from_response(response(json!({
            "code": 0,
            "data": {"fields": ["ts_code"], "items": [["601398.SH"]], "has_more": null}
        })))
        .unwrap();
        assert!(!last.has_more);
    }

    #[test]
    fn pages_are_followed_until_exhausted() {
        let mut script = vec![
            page(&["20231231", "20230930"], true),
            page(&["20230630", "20230331"], true),
            page(&["20221231"], false),
        ]
        .into_iter();
        let mut offsets = Vec::new();

        let rows = collect_pages(|offset| {
            offsets.push(offset);
            Ok(response(script.next().unwrap()))
        })
        .unwrap();

        assert_eq!(offsets, vec![0, 2, 4]);
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[4].get("end_date"), Some(&Value::from("20221231")));
    }

    #[test]
    fn stalled_pagination_is_an_error() {
        let mut script = vec![page(&["20231231"], true), page(&[], true)].into_iter();

        let err = collect_pages(|_| Ok(response(script.next().unwrap()))).unwrap_err();

        assert!(err.contains("after offset 1"));
    }

    #[test]
    fn failed_page_fails_the_whole_pull() {
        let mut calls = 0;
        let err = collect_pages(|_| {
            calls += 1;
            if calls == 1 {
                Ok(response(page(&["20231231"], true)))
            } else {
                Err("request failed with status 502 Bad Gateway".to_string())
            }
        })
        .unwrap_err();

        assert!(err.contains("502"));
    }

    #[test]
    fn request_asks_for_declared_columns() {
        let config = TushareConfig {
            token: "t0ken".to_string(),
            api_url: "http://localhost:1".to_string(),
            timeout_secs: 1,
        };
        let client = TushareClient::new(&config).unwrap();
        let entity = Entity::new("601398.SH", "工商银行").unwrap();

        let body = serde_json::to_value(client.request_body(&entity, RecordType::Dividend, 0)).unwrap();

        assert_eq!(body["api_name"], "dividend");
        assert_eq!(body["params"]["ts_code"], "601398.SH");
        assert!(body["fields"].as_str().unwrap().starts_with("ts_code,end_date,div_proc"));
        assert!(body["params"].get("offset").is_none());

        let next = serde_json::to_value(client.request_body(&entity, RecordType::Dividend, 5000)).unwrap();
        assert_eq!(next["params"]["offset"], 5000);
    }

    #[test]
    fn unreachable_provider_is_fetch_error() {
        let config = TushareConfig {
            token: "t0ken".to_string(),
            api_url: "http://127.0.0.1:9/".to_string(),
            timeout_secs: 1,
        };
        let client = TushareClient::new(&config).unwrap();
        let entity = Entity::new("601398.SH", "工商银行").unwrap();

        let err = client.fetch(&entity, RecordType::Income).unwrap_err();
        assert!(matches!(err, IngestError::Fetch { .. }));
        assert!(!err.is_fatal());
    }
}
