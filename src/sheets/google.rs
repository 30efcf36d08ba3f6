use super::auth::{ServiceAccountKey, TokenSource};
use super::store::{CellValue, SheetStore, SheetTarget, WorksheetHandle};
use crate::error::SinkError;
use async_trait::async_trait;
use reqwest::{Response, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const DRIVE_FILES_API: &str = "https://www.googleapis.com/drive/v3/files";
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Google Sheets v4 backed store.
#[derive(Clone)]
pub struct GoogleSheets {
    http: reqwest::Client,
    tokens: TokenSource,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
    #[serde(default)]
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

impl GoogleSheets {
    pub fn new(key: ServiceAccountKey) -> Result<Self, SinkError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            tokens: TokenSource::new(key, http.clone()),
            http,
        })
    }

    pub fn from_credentials_file(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        Self::new(ServiceAccountKey::from_file(path)?)
    }

    async fn find_spreadsheet(&self, token: &str, name: &str) -> Result<String, SinkError> {
        let query = format!(
            "name = '{}' and mimeType = 'application/vnd.google-apps.spreadsheet' and trashed = false",
            name.replace('\\', "\\\\").replace('\'', "\\'")
        );
        let res = self
            .http
            .get(DRIVE_FILES_API)
            .bearer_auth(token)
            .query(&[("q", query.as_str()), ("fields", "files(id)")])
            .send()
            .await?;
        let list: FileList = check(res).await?.json().await?;
        list.files
            .into_iter()
            .next()
            .map(|f| f.id)
            .ok_or_else(|| SinkError::NotFound(name.to_string()))
    }

    async fn worksheets(&self, token: &str, spreadsheet_id: &str) -> Result<Vec<SheetProperties>, SinkError> {
        let res = self
            .http
            .get(format!("{}/{}", SHEETS_API, spreadsheet_id))
            .bearer_auth(token)
            .query(&[("fields", "sheets.properties(sheetId,title,index)")])
            .send()
            .await?;
        let meta: SpreadsheetMeta = check(res).await?.json().await?;
        let mut props: Vec<SheetProperties> = meta.sheets.into_iter().map(|s| s.properties).collect();
        props.sort_by_key(|p| p.index);
        Ok(props)
    }

    async fn batch_update(&self, sheet: &WorksheetHandle, body: &Value) -> Result<(), SinkError> {
        let token = self.tokens.token().await?;
        let res = self
            .http
            .post(format!("{}/{}:batchUpdate", SHEETS_API, sheet.spreadsheet_id))
            .bearer_auth(&token)
            .json(body)
            .send()
            .await?;
        check(res).await?;
        Ok(())
    }

    async fn write_values(
        &self,
        sheet: &WorksheetHandle,
        range: &str,
        values: &[CellValue],
    ) -> Result<(), SinkError> {
        let token = self.tokens.token().await?;
        let res = self
            .http
            .put(values_url(&sheet.spreadsheet_id, range)?)
            .bearer_auth(&token)
            .query(&[("valueInputOption", "RAW")])
            .json(&json!({
                "range": range,
                "majorDimension": "ROWS",
                "values": [values],
            }))
            .send()
            .await?;
        check(res).await?;
        Ok(())
    }
}

#[async_trait]
impl SheetStore for GoogleSheets {
    async fn open(&self, target: &SheetTarget) -> Result<WorksheetHandle, SinkError> {
        self.tokens.invalidate().await;
        let token = self.tokens.token().await?;

        let spreadsheet_id = match &target.spreadsheet_id {
            Some(id) => id.clone(),
            None => self.find_spreadsheet(&token, &target.spreadsheet).await?,
        };
        let sheets = self.worksheets(&token, &spreadsheet_id).await?;
        let count = sheets.len();
        let props = sheets
            .into_iter()
            .nth(target.worksheet)
            .ok_or(SinkError::NoSuchWorksheet {
                index: target.worksheet,
                count,
            })?;

        info!(
            spreadsheet = %target.spreadsheet,
            worksheet = %props.title,
            "worksheet opened"
        );
        Ok(WorksheetHandle {
            spreadsheet_id,
            sheet_id: props.sheet_id,
            title: props.title,
        })
    }

    async fn insert_row(
        &self,
        sheet: &WorksheetHandle,
        values: &[CellValue],
        position: usize,
    ) -> Result<(), SinkError> {
        self.batch_update(sheet, &insert_row_request(sheet.sheet_id, position, values))
            .await?;
        debug!(worksheet = %sheet.title, position, "row inserted");
        Ok(())
    }

    async fn update_cell(
        &self,
        sheet: &WorksheetHandle,
        cell: &str,
        value: &CellValue,
    ) -> Result<(), SinkError> {
        self.write_values(sheet, &a1_range(&sheet.title, cell), std::slice::from_ref(value))
            .await
    }

    async fn delete_row(&self, sheet: &WorksheetHandle, position: usize) -> Result<(), SinkError> {
        self.batch_update(sheet, &delete_rows_request(sheet.sheet_id, position))
            .await
    }

    async fn used_rows(&self, sheet: &WorksheetHandle) -> Result<usize, SinkError> {
        let token = self.tokens.token().await?;
        let res = self
            .http
            .get(values_url(&sheet.spreadsheet_id, &a1_range(&sheet.title, "A:A"))?)
            .bearer_auth(&token)
            .query(&[("majorDimension", "ROWS")])
            .send()
            .await?;
        let range: ValueRange = check(res).await?.json().await?;
        Ok(range.values.len())
    }
}

/// Turn non-2xx responses into `SinkError::Api`, preferring the message of
/// Google's JSON error envelope over the raw body.
async fn check(res: Response) -> Result<Response, SinkError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(String::from))
        .unwrap_or(body);
    Err(SinkError::Api {
        status: status.as_u16(),
        message,
    })
}

fn values_url(spreadsheet_id: &str, range: &str) -> Result<Url, SinkError> {
    let mut url = Url::parse(SHEETS_API)
        .map_err(|e| SinkError::Credentials(format!("bad API base url: {}", e)))?;
    url.path_segments_mut()
        .map_err(|_| SinkError::Credentials("API base url cannot take a path".into()))?
        .push(spreadsheet_id)
        .push("values")
        .push(range);
    Ok(url)
}

/// `'Sheet 1'!A2`, with quotes in the title doubled.
pub fn a1_range(title: &str, cells: &str) -> String {
    format!("'{}'!{}", title.replace('\'', "''"), cells)
}

fn row_range(sheet_id: i64, position: usize) -> Value {
    let start = position.saturating_sub(1);
    json!({
        "sheetId": sheet_id,
        "dimension": "ROWS",
        "startIndex": start,
        "endIndex": start + 1,
    })
}

/// Insert a row and fill it in one `batchUpdate`, which Sheets applies
/// atomically: either the filled row exists afterwards or nothing changed.
pub fn insert_row_request(sheet_id: i64, position: usize, values: &[CellValue]) -> Value {
    let cells: Vec<Value> = values.iter().map(extended_value).collect();
    json!({
        "requests": [
            {
                "insertDimension": {
                    "range": row_range(sheet_id, position),
                    "inheritFromBefore": false,
                }
            },
            {
                "updateCells": {
                    "start": {
                        "sheetId": sheet_id,
                        "rowIndex": position.saturating_sub(1),
                        "columnIndex": 0,
                    },
                    "rows": [{ "values": cells }],
                    "fields": "userEnteredValue",
                }
            }
        ]
    })
}

fn extended_value(value: &CellValue) -> Value {
    match value {
        CellValue::Number(n) => json!({ "userEnteredValue": { "numberValue": n } }),
        CellValue::Text(t) => json!({ "userEnteredValue": { "stringValue": t } }),
    }
}

pub fn delete_rows_request(sheet_id: i64, position: usize) -> Value {
    json!({
        "requests": [{
            "deleteDimension": {
                "range": row_range(sheet_id, position),
            }
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_a1_range_quotes_title() {
        assert_eq!(a1_range("Sheet1", "A2"), "'Sheet1'!A2");
        assert_eq!(a1_range("Bob's log", "L1"), "'Bob''s log'!L1");
    }

    #[test]
    fn test_insert_request_targets_one_row() {
        let body = insert_row_request(42, 2, &[CellValue::from(1.0)]);
        let range = &body["requests"][0]["insertDimension"]["range"];
        assert_eq!(range["sheetId"], 42);
        assert_eq!(range["dimension"], "ROWS");
        assert_eq!(range["startIndex"], 1);
        assert_eq!(range["endIndex"], 2);
    }

    #[test]
    fn test_insert_and_fill_share_one_batch() {
        let row = vec![CellValue::from("2026-06-01 12:00:00"), CellValue::from(24.02)];
        let body = insert_row_request(42, 2, &row);

        let requests = body["requests"].as_array().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].get("insertDimension").is_some());

        let update = &requests[1]["updateCells"];
        assert_eq!(update["start"], json!({"sheetId": 42, "rowIndex": 1, "columnIndex": 0}));
        assert_eq!(update["fields"], "userEnteredValue");
        assert_eq!(
            update["rows"],
            json!([{ "values": [
                { "userEnteredValue": { "stringValue": "2026-06-01 12:00:00" } },
                { "userEnteredValue": { "numberValue": 24.02 } },
            ]}])
        );
    }

    #[test]
    fn test_delete_request_targets_one_row() {
        let body = delete_rows_request(7, 2);
        let range = &body["requests"][0]["deleteDimension"]["range"];
        assert_eq!(range["startIndex"], 1);
        assert_eq!(range["endIndex"], 2);
    }

    #[test]
    fn test_values_url_encodes_range() {
        let url = values_url("abc123", &a1_range("Solar log", "A:A")).unwrap();
        let s = url.as_str();
        assert!(s.starts_with("https://sheets.googleapis.com/v4/spreadsheets/abc123/values/"));
        assert!(!s.contains(' '));
        assert!(s.contains("Solar%20log"));
    }

    #[test]
    fn test_cell_values_serialize_untagged() {
        let row = vec![CellValue::from("2026-10-18"), CellValue::from(12.5)];
        assert_eq!(serde_json::to_value(&row).unwrap(), json!(["2026-10-18", 12.5]));
    }

    #[test]
    fn test_worksheet_metadata_parses() {
        let raw = r#"{"sheets":[
            {"properties":{"sheetId":99,"title":"Daily","index":1}},
            {"properties":{"sheetId":0,"title":"Log","index":0}}
        ]}"#;
        let meta: SpreadsheetMeta = serde_json::from_str(raw).unwrap();
        let mut props: Vec<SheetProperties> = meta.sheets.into_iter().map(|s| s.properties).collect();
        props.sort_by_key(|p| p.index);
        assert_eq!(props[0].title, "Log");
        assert_eq!(props[1].sheet_id, 99);
    }
}
