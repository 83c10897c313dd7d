use chrono::NaiveDateTime;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

use super::client::ApiClient;
use super::conversion::SourceFile;
use super::error::ApiResult;

// The service pages its list endpoint; this is high enough for the whole
// dictionary in one response.
const LIST_LIMIT: u32 = 10_000;

#[derive(Debug, Clone, Deserialize)]
pub struct ProductAccountMapping {
    pub id: i64,
    #[serde(rename = "producto")]
    pub product_code: String,
    #[serde(rename = "cuenta_contable")]
    pub account_code: String,
    #[serde(rename = "activo")]
    pub active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComboJumpRule {
    pub id: i64,
    #[serde(rename = "combo")]
    pub combo_code: String,
    #[serde(rename = "salto")]
    pub jump_count: i64,
    #[serde(rename = "activo")]
    pub active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(Serialize)]
struct NewProductMapping<'a> {
    producto: &'a str,
    cuenta_contable: &'a str,
    activo: bool,
}

#[derive(Serialize)]
struct NewComboRule<'a> {
    combo: &'a str,
    salto: i64,
    activo: bool,
}

/// Partial update payload; absent fields keep their current value.
#[derive(Debug, Default, Serialize)]
pub struct ProductMappingChanges {
    #[serde(rename = "producto", skip_serializing_if = "Option::is_none")]
    pub product_code: Option<String>,
    #[serde(rename = "cuenta_contable", skip_serializing_if = "Option::is_none")]
    pub account_code: Option<String>,
    #[serde(rename = "activo", skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

#[derive(Debug, Default, Serialize)]
pub struct ComboRuleChanges {
    #[serde(rename = "combo", skip_serializing_if = "Option::is_none")]
    pub combo_code: Option<String>,
    #[serde(rename = "salto", skip_serializing_if = "Option::is_none")]
    pub jump_count: Option<i64>,
    #[serde(rename = "activo", skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ImportSummary {
    pub message: String,
}

pub async fn list_product_mappings(
    client: &ApiClient,
    active_only: Option<bool>,
) -> ApiResult<Vec<ProductAccountMapping>> {
    log::info!("Requesting product mappings...");
    let mut query: Vec<(&str, String)> = vec![("limit", LIST_LIMIT.to_string())];
    if let Some(active) = active_only {
        query.push(("activo", active.to_string()));
    }
    let mappings: Vec<ProductAccountMapping> = client
        .get_json("/configuracion/productos-cuentas", &query)
        .await?;
    log::info!("Requesting product mappings...done ({})", mappings.len());
    Ok(mappings)
}

/// Fails with a conflict when the product is already mapped. The
/// reconciliation batch treats that as success by another name.
pub async fn create_product_mapping(
    client: &ApiClient,
    product_code: &str,
    account_code: &str,
) -> ApiResult<ProductAccountMapping> {
    client
        .post_json(
            "/configuracion/productos-cuentas",
            &NewProductMapping {
                producto: product_code,
                cuenta_contable: account_code,
                activo: true,
            },
        )
        .await
}

pub async fn update_product_mapping(
    client: &ApiClient,
    id: i64,
    changes: &ProductMappingChanges,
) -> ApiResult<ProductAccountMapping> {
    client
        .put_json(&format!("/configuracion/productos-cuentas/{id}"), changes)
        .await
}

/// Deactivates the row server-side; the workflow never calls this.
pub async fn delete_product_mapping(client: &ApiClient, id: i64) -> ApiResult<()> {
    client
        .delete(&format!("/configuracion/productos-cuentas/{id}"))
        .await
}

pub async fn import_product_mappings(
    client: &ApiClient,
    file: &SourceFile,
) -> ApiResult<ImportSummary> {
    log::info!("Importing product mappings from {}...", file.name);
    let summary = client
        .post_multipart(
            "/configuracion/productos-cuentas/importar",
            upload_form(file),
        )
        .await?;
    log::info!("Importing product mappings from {}...done", file.name);
    Ok(summary)
}

pub async fn list_combo_rules(
    client: &ApiClient,
    active_only: Option<bool>,
) -> ApiResult<Vec<ComboJumpRule>> {
    log::info!("Requesting combo rules...");
    let mut query: Vec<(&str, String)> = Vec::new();
    if let Some(active) = active_only {
        query.push(("activo", active.to_string()));
    }
    let rules: Vec<ComboJumpRule> = client
        .get_json("/configuracion/combos-salto", &query)
        .await?;
    log::info!("Requesting combo rules...done ({})", rules.len());
    Ok(rules)
}

pub async fn create_combo_rule(
    client: &ApiClient,
    combo_code: &str,
    jump_count: i64,
) -> ApiResult<ComboJumpRule> {
    client
        .post_json(
            "/configuracion/combos-salto",
            &NewComboRule {
                combo: combo_code,
                salto: jump_count,
                activo: true,
            },
        )
        .await
}

pub async fn update_combo_rule(
    client: &ApiClient,
    id: i64,
    changes: &ComboRuleChanges,
) -> ApiResult<ComboJumpRule> {
    client
        .put_json(&format!("/configuracion/combos-salto/{id}"), changes)
        .await
}

pub async fn delete_combo_rule(client: &ApiClient, id: i64) -> ApiResult<()> {
    client.delete(&format!("/configuracion/combos-salto/{id}")).await
}

pub async fn import_combo_rules(client: &ApiClient, file: &SourceFile) -> ApiResult<ImportSummary> {
    log::info!("Importing combo rules from {}...", file.name);
    let summary = client
        .post_multipart("/configuracion/combos-salto/importar", upload_form(file))
        .await?;
    log::info!("Importing combo rules from {}...done", file.name);
    Ok(summary)
}

fn upload_form(file: &SourceFile) -> Form {
    Form::new().part(
        "archivo",
        Part::bytes(file.bytes.clone()).file_name(file.name.clone()),
    )
}
