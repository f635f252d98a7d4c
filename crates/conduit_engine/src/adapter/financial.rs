//! Financial-data aggregator adapter (Plaid-style JSON API).
//!
//! Every call is a POST carrying the client credentials and item access token
//! in the body. Transactions page by offset against `total_transactions`.

use serde_json::{json, Map, Value as Json};

use super::{list_arg, text_arg, Exchange, NativePage, NativeRequest, PageCursor};
use crate::config::FinancialConfig;
use crate::descriptor::NativeCallDescriptor;
use crate::error::{HandlerError, HandlerResult};
use crate::passthrough::NativeOperation;
use crate::transport::TransportRequest;
use crate::value::Value;

pub(super) static OPERATIONS: &[NativeOperation] = &[
    NativeOperation {
        name: "get_transactions",
        required: &["start_date", "end_date"],
        optional: &["account_ids", "count", "offset"],
        description: "Raw transactions between two dates (inclusive).",
    },
    NativeOperation {
        name: "get_balance",
        required: &[],
        optional: &["account_ids"],
        description: "Real-time balances of the item's accounts.",
    },
    NativeOperation {
        name: "get_item",
        required: &[],
        optional: &[],
        description: "Metadata of the linked item.",
    },
    NativeOperation {
        name: "get_institution",
        required: &["institution_id"],
        optional: &["country_codes"],
        description: "Institution details by identifier.",
    },
];

#[derive(Debug)]
pub struct FinancialAdapter {
    config: FinancialConfig,
}

impl FinancialAdapter {
    pub fn new(config: FinancialConfig) -> Self {
        Self { config }
    }

    /// Body skeleton carrying credentials.
    fn body(&self) -> Map<String, Json> {
        let mut body = Map::new();
        body.insert("client_id".into(), json!(self.config.client_id));
        body.insert("secret".into(), json!(self.config.secret));
        body.insert("access_token".into(), json!(self.config.access_token));
        body
    }

    pub(super) async fn authenticate(&mut self, exchange: &Exchange) -> HandlerResult<()> {
        let response = exchange
            .call_json(
                "item_get",
                TransportRequest::post("/item/get", Json::Object(self.body())),
            )
            .await?;
        if response.get("item").is_none() {
            return Err(HandlerError::malformed("item/get response has no 'item'"));
        }
        Ok(())
    }

    pub(super) async fn fetch_page(
        &mut self,
        exchange: &Exchange,
        request: &NativeRequest,
        cursor: &PageCursor,
        page_size: usize,
    ) -> HandlerResult<NativePage> {
        match request.resource.as_str() {
            "transactions" => {
                let offset = match cursor {
                    PageCursor::Start => 0,
                    PageCursor::Offset(offset) => *offset,
                    other => {
                        return Err(HandlerError::validation(format!(
                            "transactions cannot resume from {other:?}"
                        )))
                    }
                };
                let param = |name: &str| request.params.get(name).map(Value::to_json);
                let (Some(start_date), Some(end_date)) = (param("start_date"), param("end_date"))
                else {
                    return Err(HandlerError::MissingRequiredFilter {
                        table: request.table.clone(),
                        parameter: "start_date/end_date".to_string(),
                    });
                };
                let mut options = Map::new();
                options.insert("count".into(), json!(page_size));
                options.insert("offset".into(), json!(offset));
                if let Some(account) = request.params.get("account_ids") {
                    options.insert("account_ids".into(), list_arg(account));
                }
                let mut body = self.body();
                body.insert("start_date".into(), start_date);
                body.insert("end_date".into(), end_date);
                body.insert("options".into(), Json::Object(options));
                let response = exchange
                    .call_json(
                        "transactions_get",
                        TransportRequest::post("/transactions/get", Json::Object(body)),
                    )
                    .await?;
                let records = records_at(&response, "transactions")?;
                let total = response
                    .get("total_transactions")
                    .and_then(Json::as_u64)
                    .ok_or_else(|| {
                        HandlerError::malformed("transactions response has no 'total_transactions'")
                    })? as usize;
                let fetched = offset + records.len();
                let next = (!records.is_empty() && fetched < total).then_some(PageCursor::Offset(fetched));
                Ok(NativePage { records, next })
            }
            "accounts" => {
                let mut body = self.body();
                if let Some(account) = request.params.get("account_ids") {
                    body.insert("options".into(), json!({ "account_ids": list_arg(account) }));
                }
                let response = exchange
                    .call_json(
                        "accounts_balance_get",
                        TransportRequest::post("/accounts/balance/get", Json::Object(body)),
                    )
                    .await?;
                Ok(NativePage {
                    records: records_at(&response, "accounts")?,
                    next: None,
                })
            }
            other => Err(HandlerError::validation(format!(
                "financial aggregator has no resource '{other}'"
            ))),
        }
    }

    pub(super) async fn native_call(
        &mut self,
        exchange: &Exchange,
        call: &NativeCallDescriptor,
    ) -> HandlerResult<Vec<Json>> {
        match call.operation.as_str() {
            "get_transactions" => {
                let mut options = Map::new();
                for name in ["count", "offset"] {
                    if let Some(value) = call.args.get(name) {
                        options.insert(name.into(), value.to_json());
                    }
                }
                if let Some(accounts) = call.args.get("account_ids") {
                    options.insert("account_ids".into(), list_arg(accounts));
                }
                let mut body = self.body();
                body.insert("start_date".into(), json!(text_arg(call, "start_date")?));
                body.insert("end_date".into(), json!(text_arg(call, "end_date")?));
                body.insert("options".into(), Json::Object(options));
                let response = exchange
                    .call_json(
                        "transactions_get",
                        TransportRequest::post("/transactions/get", Json::Object(body)),
                    )
                    .await?;
                records_at(&response, "transactions")
            }
            "get_balance" => {
                let mut body = self.body();
                if let Some(accounts) = call.args.get("account_ids") {
                    body.insert("options".into(), json!({ "account_ids": list_arg(accounts) }));
                }
                let response = exchange
                    .call_json(
                        "accounts_balance_get",
                        TransportRequest::post("/accounts/balance/get", Json::Object(body)),
                    )
                    .await?;
                records_at(&response, "accounts")
            }
            "get_item" => {
                let response = exchange
                    .call_json(
                        "item_get",
                        TransportRequest::post("/item/get", Json::Object(self.body())),
                    )
                    .await?;
                single_at(response, "item")
            }
            "get_institution" => {
                let country_codes = call
                    .args
                    .get("country_codes")
                    .map(list_arg)
                    .unwrap_or_else(|| json!(["US"]));
                let body = json!({
                    "client_id": self.config.client_id,
                    "secret": self.config.secret,
                    "institution_id": text_arg(call, "institution_id")?,
                    "country_codes": country_codes,
                });
                let response = exchange
                    .call_json(
                        "institutions_get_by_id",
                        TransportRequest::post("/institutions/get_by_id", body),
                    )
                    .await?;
                single_at(response, "institution")
            }
            other => Err(HandlerError::UnknownOperation {
                engine: "financial-aggregator".to_string(),
                operation: other.to_string(),
            }),
        }
    }
}

fn records_at(response: &Json, field: &str) -> HandlerResult<Vec<Json>> {
    response
        .get(field)
        .and_then(Json::as_array)
        .cloned()
        .ok_or_else(|| HandlerError::malformed(format!("response has no '{field}' array")))
}

fn single_at(mut response: Json, field: &str) -> HandlerResult<Vec<Json>> {
    match response.get_mut(field).map(Json::take) {
        Some(record @ Json::Object(_)) => Ok(vec![record]),
        _ => Err(HandlerError::malformed(format!(
            "response has no '{field}' object"
        ))),
    }
}
