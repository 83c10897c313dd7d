use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use super::client::ApiClient;
use super::error::{ApiError, ApiResult};

const ALLOWED_EXTENSIONS: &[&str] = &["xls", "xlsx"];
const MAX_VOUCHER_NUMBER: u32 = 9999;

/// A sales report loaded into memory, ready for upload.
#[derive(Debug, Clone)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub struct SourceFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl SourceFile {
    pub fn has_allowed_extension(&self) -> bool {
        match self.name.rsplit_once('.') {
            Some((stem, extension)) => {
                !stem.is_empty() && ALLOWED_EXTENSIONS.contains(&extension.to_lowercase().as_str())
            }
            None => false,
        }
    }
}

/// The three submission parameters, immutable for the lifetime of a run.
#[derive(Debug, Clone)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub struct ConversionParameters {
    pub period_month: String,
    pub starting_ledger_book: u32,
    pub starting_voucher_number: u32,
}

impl ConversionParameters {
    /// Mirrors the service's form constraints so bad input never costs a
    /// round trip.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();
        let month_ok = self.period_month.len() == 2
            && self.period_month.chars().all(|c| c.is_ascii_digit())
            && (1..=12).contains(&self.period_month.parse::<u32>().unwrap_or(0));
        if !month_ok {
            problems.push(format!(
                "mes: '{}' must be a two-digit month between 01 and 12",
                self.period_month
            ));
        }
        if self.starting_ledger_book < 1 {
            problems.push("subdiario_inicial: must be 1 or greater".to_string());
        }
        if !(1..=MAX_VOUCHER_NUMBER).contains(&self.starting_voucher_number) {
            problems.push(format!(
                "numero_comprobante_inicial: must be between 1 and {MAX_VOUCHER_NUMBER}"
            ));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

/// One conversion run as reported by the service. `unmapped_codes` empty
/// means the run converged; otherwise every listed product still needs an
/// account mapping.
#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub struct ConversionRun {
    #[serde(rename = "id")]
    pub run_id: i64,
    #[serde(rename = "nombre_archivo")]
    pub source_file_name: String,
    #[serde(rename = "total_registros_procesados")]
    pub records_processed: u64,
    #[serde(rename = "total_asientos_generados")]
    pub entries_generated: u64,
    #[serde(rename = "codigos_faltantes")]
    pub unmapped_codes: Vec<String>,
    #[serde(rename = "archivo_salida_url")]
    pub output_url: String,
    #[serde(rename = "mensaje")]
    pub message: String,
}

impl ConversionRun {
    pub fn is_converged(&self) -> bool {
        self.unmapped_codes.is_empty()
    }
}

/// Submit the file for conversion. Each call is a fresh attempt: repeating
/// it without dictionary changes reports the same gaps, repeating it after
/// new mappings were saved is how the workflow converges.
pub async fn submit(
    client: &ApiClient,
    file: &SourceFile,
    params: &ConversionParameters,
) -> ApiResult<ConversionRun> {
    params.validate().map_err(ApiError::Validation)?;
    if !file.has_allowed_extension() {
        return Err(ApiError::Validation(vec![format!(
            "archivo: '{}' is not an Excel sales report (.xls/.xlsx)",
            file.name
        )]));
    }

    log::info!("Submitting {} for conversion...", file.name);
    let form = Form::new()
        .part(
            "archivo",
            Part::bytes(file.bytes.clone()).file_name(file.name.clone()),
        )
        .text("mes", params.period_month.clone())
        .text("subdiario_inicial", params.starting_ledger_book.to_string())
        .text(
            "numero_comprobante_inicial",
            params.starting_voucher_number.to_string(),
        );
    let run: ConversionRun = client.post_multipart("/procesamiento/procesar", form).await?;
    log::info!(
        "Submitting {} for conversion...done ({} unmapped)",
        file.name,
        run.unmapped_codes.len()
    );
    Ok(run)
}

/// Locator of the generated workbook. Resolving it costs nothing; fetching
/// is a separate, explicit step.
pub fn download_url(client: &ApiClient, run_id: i64) -> String {
    format!("{}/procesamiento/descargar/{}", client.base_url(), run_id)
}

pub async fn download_output(client: &ApiClient, run_id: i64) -> ApiResult<Vec<u8>> {
    log::info!("Downloading output of run {run_id}...");
    let bytes = client
        .get_bytes(&format!("/procesamiento/descargar/{run_id}"))
        .await?;
    log::info!("Downloading output of run {run_id}...done");
    Ok(bytes)
}
