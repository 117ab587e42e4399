//! Enrollment validation.
//!
//! Turns raw enrollment/edit payloads into normalized values the registry can
//! commit, collecting every failing field instead of stopping at the first.

use reqwest::Url;

use crate::errors::{AppError, FieldError};
use crate::models::{ApiKey, EnrollServerRequest, NewServer, ServerChanges, UpdateServerRequest};

const MAX_SERVER_NAME: usize = 100;
const MAX_DEBTOR_CODE: usize = 50;
const MAX_XI_VERSION: usize = 20;

/// Validate an enrollment payload.
pub fn validate_create(request: &EnrollServerRequest) -> Result<NewServer, AppError> {
    let mut errors = Vec::new();

    let server_name = required(
        &mut errors,
        "serverName",
        request.server_name.as_deref(),
        MAX_SERVER_NAME,
    );
    let base_url = match request.base_url.as_deref() {
        Some(raw) => base_url(&mut errors, raw),
        None => {
            errors.push(FieldError::new("baseUrl", "is required"));
            None
        }
    };
    let api_key = match request.api_key.as_deref().map(str::trim) {
        Some(key) if !key.is_empty() => Some(ApiKey::new(key)),
        _ => {
            errors.push(FieldError::new("apiKey", "is required"));
            None
        }
    };
    let pronto_debtor_code = required(
        &mut errors,
        "prontoDebtorCode",
        request.pronto_debtor_code.as_deref(),
        MAX_DEBTOR_CODE,
    );
    let pronto_xi_version = required(
        &mut errors,
        "prontoXiVersion",
        request.pronto_xi_version.as_deref(),
        MAX_XI_VERSION,
    );

    match (
        server_name,
        base_url,
        api_key,
        pronto_debtor_code,
        pronto_xi_version,
    ) {
        (
            Some(server_name),
            Some(base_url),
            Some(api_key),
            Some(pronto_debtor_code),
            Some(pronto_xi_version),
        ) if errors.is_empty() => Ok(NewServer {
            server_name,
            base_url,
            api_key,
            pronto_debtor_code,
            pronto_xi_version,
            is_active: request.is_active.unwrap_or(true),
        }),
        _ => Err(AppError::Validation(errors)),
    }
}

/// Validate a partial edit payload.
///
/// A blank `apiKey` is dropped from the change set so the stored credential
/// is never cleared.
pub fn validate_update(request: &UpdateServerRequest) -> Result<ServerChanges, AppError> {
    let mut errors = Vec::new();

    let server_name = request
        .server_name
        .as_deref()
        .and_then(|v| required(&mut errors, "serverName", Some(v), MAX_SERVER_NAME));
    let base_url = request
        .base_url
        .as_deref()
        .and_then(|v| base_url(&mut errors, v));
    let api_key = request
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(ApiKey::new);
    let pronto_debtor_code = request.pronto_debtor_code.as_deref().and_then(|v| {
        required(&mut errors, "prontoDebtorCode", Some(v), MAX_DEBTOR_CODE)
    });
    let pronto_xi_version = request
        .pronto_xi_version
        .as_deref()
        .and_then(|v| required(&mut errors, "prontoXiVersion", Some(v), MAX_XI_VERSION));

    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    Ok(ServerChanges {
        server_name,
        base_url,
        api_key,
        pronto_debtor_code,
        pronto_xi_version,
        is_active: request.is_active,
    })
}

fn required(
    errors: &mut Vec<FieldError>,
    field: &str,
    value: Option<&str>,
    max_len: usize,
) -> Option<String> {
    let value = value.map(str::trim).unwrap_or_default();
    if value.is_empty() {
        errors.push(FieldError::new(field, "is required"));
        return None;
    }
    if value.chars().count() > max_len {
        errors.push(FieldError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
        return None;
    }
    Some(value.to_string())
}

/// Accept only absolute http(s) URLs with a host; strip trailing slashes.
fn base_url(errors: &mut Vec<FieldError>, raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        errors.push(FieldError::new("baseUrl", "is required"));
        return None;
    }

    match Url::parse(trimmed) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => {
            Some(trimmed.trim_end_matches('/').to_string())
        }
        Ok(_) => {
            errors.push(FieldError::new(
                "baseUrl",
                "must use http or https and include a host",
            ));
            None
        }
        Err(e) => {
            errors.push(FieldError::new(
                "baseUrl",
                format!("is not a valid absolute URL ({})", e),
            ));
            None
        }
    }
}
