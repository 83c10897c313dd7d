use chrono::NaiveDateTime;
use serde::Deserialize;

use super::client::ApiClient;
use super::error::ApiResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum RunStatus {
    #[serde(rename = "completado")]
    Completed,
    #[serde(rename = "error")]
    Failed,
}

/// One past conversion run. Append-only: the workflow writes these through
/// the service as a side effect of processing, this module only reads and
/// deletes them.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryRecord {
    pub id: i64,
    #[serde(rename = "nombre_archivo")]
    pub source_file_name: String,
    #[serde(rename = "mes")]
    pub period_month: String,
    #[serde(rename = "subdiario_inicial")]
    pub starting_ledger_book: u32,
    #[serde(rename = "numero_comprobante_inicial")]
    pub starting_voucher_number: u32,
    #[serde(rename = "total_registros_procesados")]
    pub records_processed: u64,
    #[serde(rename = "total_asientos_generados")]
    pub entries_generated: u64,
    /// JSON-encoded list; absent when the run had no gaps.
    #[serde(rename = "codigos_faltantes")]
    pub unmapped_codes_raw: Option<String>,
    #[serde(rename = "estado")]
    pub status: RunStatus,
    #[serde(rename = "mensaje_error")]
    pub error_message: Option<String>,
    #[serde(rename = "procesado_por")]
    pub processed_by: Option<String>,
    pub created_at: NaiveDateTime,
}

impl HistoryRecord {
    pub fn unmapped_codes(&self) -> Vec<String> {
        self.unmapped_codes_raw
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}

/// Most recent runs first, as ordered by the service.
pub async fn list(client: &ApiClient, limit: u32) -> ApiResult<Vec<HistoryRecord>> {
    log::info!("Requesting history...");
    let records: Vec<HistoryRecord> = client
        .get_json("/historial/", &[("limit", limit.to_string())])
        .await?;
    log::info!("Requesting history...done ({})", records.len());
    Ok(records)
}

pub async fn get(client: &ApiClient, id: i64) -> ApiResult<HistoryRecord> {
    client.get_json(&format!("/historial/{id}"), &[]).await
}

pub async fn delete(client: &ApiClient, id: i64) -> ApiResult<()> {
    client.delete(&format!("/historial/{id}")).await
}
