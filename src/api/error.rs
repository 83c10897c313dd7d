use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Failure taxonomy for remote calls. The workflow branches on these: a
/// conflict inside a save batch is recoverable, an auth failure aborts the
/// whole run, everything else halts the current step until the operator
/// retries it.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("already mapped: {0}")]
    Conflict(String),

    #[error("session expired or invalid")]
    Auth,

    #[error("{0}")]
    NotFound(String),

    #[error("service unreachable: {0}")]
    Transfer(String),
}

impl ApiError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ApiError::Conflict(_))
    }
}

/// FastAPI error payloads come in two shapes: `{"detail": "message"}` for
/// handler-raised errors and `{"detail": [{"loc": [...], "msg": "..."}]}` for
/// 422 validation failures.
#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<Detail>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Detail {
    Message(String),
    Fields(Vec<FieldIssue>),
}

#[derive(Deserialize)]
struct FieldIssue {
    #[serde(default)]
    loc: Vec<serde_json::Value>,
    msg: String,
}

impl FieldIssue {
    fn render(&self) -> String {
        // The last loc element is the field name; the first is just "body".
        match self.loc.last().and_then(|part| part.as_str()) {
            Some(field) => format!("{}: {}", field, self.msg),
            None => self.msg.clone(),
        }
    }
}

fn detail_of(body: &str) -> Option<Detail> {
    serde_json::from_str::<ErrorBody>(body).ok()?.detail
}

fn message_of(body: &str) -> Option<String> {
    match detail_of(body) {
        Some(Detail::Message(message)) => Some(message),
        _ => None,
    }
}

/// Map a non-success HTTP response to the taxonomy. The service reports
/// duplicate dictionary rows as 400 with a "... ya existe" detail, so that
/// shape is recognized as a conflict alongside a plain 409.
pub(super) fn from_response(status: StatusCode, body: &str) -> ApiError {
    match status {
        StatusCode::UNAUTHORIZED => ApiError::Auth,
        StatusCode::NOT_FOUND => {
            ApiError::NotFound(message_of(body).unwrap_or_else(|| "not found".to_string()))
        }
        StatusCode::CONFLICT => {
            ApiError::Conflict(message_of(body).unwrap_or_else(|| "duplicate entry".to_string()))
        }
        StatusCode::BAD_REQUEST => {
            let message = message_of(body).unwrap_or_else(|| "rejected by the service".to_string());
            if message.contains("ya existe") {
                ApiError::Conflict(message)
            } else {
                ApiError::Validation(vec![message])
            }
        }
        StatusCode::UNPROCESSABLE_ENTITY => match detail_of(body) {
            Some(Detail::Fields(issues)) => {
                ApiError::Validation(issues.iter().map(FieldIssue::render).collect())
            }
            Some(Detail::Message(message)) => ApiError::Validation(vec![message]),
            None => ApiError::Validation(vec!["rejected by the service".to_string()]),
        },
        _ => {
            let message = message_of(body).unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            ApiError::Transfer(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_maps_to_auth() {
        let err = from_response(StatusCode::UNAUTHORIZED, r#"{"detail": "No autenticado"}"#);
        assert!(matches!(err, ApiError::Auth));
    }

    #[test]
    fn duplicate_row_maps_to_conflict() {
        let err = from_response(StatusCode::BAD_REQUEST, r#"{"detail": "El producto ya existe"}"#);
        match err {
            ApiError::Conflict(message) => assert_eq!("El producto ya existe", message),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn other_bad_request_maps_to_validation() {
        let err = from_response(
            StatusCode::BAD_REQUEST,
            r#"{"detail": "El archivo debe tener al menos 2 columnas"}"#,
        );
        match err {
            ApiError::Validation(problems) => {
                assert_eq!(vec!["El archivo debe tener al menos 2 columnas"], problems)
            }
            other => panic!("expected validation, got {other:?}"),
        }
    }

    #[test]
    fn field_errors_keep_the_field_name() {
        let body = r#"{"detail": [
            {"loc": ["body", "mes"], "msg": "ensure this value has at least 2 characters"},
            {"loc": ["body", "numero_comprobante_inicial"], "msg": "ensure this value is less than or equal to 9999"}
        ]}"#;
        let err = from_response(StatusCode::UNPROCESSABLE_ENTITY, body);
        match err {
            ApiError::Validation(problems) => {
                assert_eq!(2, problems.len());
                assert!(problems[0].starts_with("mes: "));
                assert!(problems[1].starts_with("numero_comprobante_inicial: "));
            }
            other => panic!("expected validation, got {other:?}"),
        }
    }

    #[test]
    fn server_error_maps_to_transfer_with_detail() {
        let err = from_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"detail": "Error al procesar archivo: hoja vacia"}"#,
        );
        match err {
            ApiError::Transfer(message) => {
                assert_eq!("Error al procesar archivo: hoja vacia", message)
            }
            other => panic!("expected transfer, got {other:?}"),
        }
    }

    #[test]
    fn unparseable_body_still_maps() {
        let err = from_response(StatusCode::BAD_GATEWAY, "<html>nginx</html>");
        match err {
            ApiError::Transfer(message) => assert_eq!("HTTP 502", message),
            other => panic!("expected transfer, got {other:?}"),
        }
    }
}
