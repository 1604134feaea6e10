use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use forgejobs_core::PrincipalId;

use crate::app::errors;
use crate::context::PrincipalContext;

pub const PRINCIPAL_HEADER: &str = "x-principal-id";

/// Reads the optional principal header into a [`PrincipalContext`] extension.
///
/// A header that is present but unparsable is rejected rather than ignored.
pub async fn principal_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let principal = match extract_principal(req.headers()) {
        Ok(p) => p,
        Err(message) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_principal", message);
        }
    };

    req.extensions_mut().insert(PrincipalContext::new(principal));

    next.run(req).await
}

fn extract_principal(headers: &HeaderMap) -> Result<Option<PrincipalId>, String> {
    let Some(header) = headers.get(PRINCIPAL_HEADER) else {
        return Ok(None);
    };

    let value = header
        .to_str()
        .map_err(|_| format!("{PRINCIPAL_HEADER} must be ASCII"))?
        .trim();
    if value.is_empty() {
        return Ok(None);
    }

    value.parse().map(Some).map_err(|e| format!("{e}"))
}
