//! Contact-form endpoint plus health and security-status handlers.

use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use tracing::warn;

use crate::api::{middleware::client_ip, AppState};
use crate::defense::{GuardRequest, ReasonCode, SubmittedFields};
use crate::store::{NewContact, SecurityEvent, Severity};

const MAX_NAME_LEN: usize = 100;
const MIN_DESCRIPTION_LEN: usize = 10;
const MAX_DESCRIPTION_LEN: usize = 2_000;

#[derive(Debug, Deserialize)]
pub struct ContactForm {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub equipment_type: Option<String>,
    pub problem_description: String,
}

pub async fn submit_contact(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(form): Json<ContactForm>,
) -> Response {
    let ip = client_ip(&headers, Some(&addr));
    let user_agent = header_value(&headers, "user-agent");

    let request = GuardRequest {
        ip: ip.clone(),
        endpoint: "/api/contact".to_string(),
        user_agent: user_agent.clone(),
        referer: header_value(&headers, "referer"),
        accept: header_value(&headers, "accept"),
        accept_language: header_value(&headers, "accept-language"),
        fields: Some(SubmittedFields {
            name: form.name.clone(),
            email: form.email.clone(),
            phone: form.phone.clone(),
            equipment_type: form.equipment_type.clone(),
            problem_description: form.problem_description.clone(),
        }),
    };

    let decision = state.pipeline.evaluate(&request).await;
    if !decision.allowed {
        return rejection_response(&decision.reason_code, decision.retry_after_seconds);
    }

    if let Err(message) = validate_form(&form) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Datos inválidos",
                "message": message,
                "code": "VALIDATION_FAILED",
            })),
        )
            .into_response();
    }

    let contact = NewContact {
        name: form.name.trim().to_string(),
        email: form.email.trim().to_lowercase(),
        phone: form.phone.map(|phone| phone.trim().to_string()),
        equipment_type: form.equipment_type,
        problem_description: form.problem_description.trim().to_string(),
        ip: ip.clone(),
        user_agent: user_agent.clone(),
    };

    let contact_id = match state.store.insert_contact(contact.clone()).await {
        Ok(id) => id,
        Err(err) => {
            warn!(ip = %ip, error = %err, "failed to persist contact");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Error interno",
                    "message": "No se pudo guardar tu solicitud. Intenta nuevamente.",
                    "code": "STORAGE_ERROR",
                })),
            )
                .into_response();
        }
    };

    let event = SecurityEvent::new("contact_attempt", &ip, Severity::Info)
        .with_user_agent(user_agent.as_deref())
        .with_request_data(json!({
            "contact_id": contact_id,
            "name": contact.name,
            "email": contact.email,
        }))
        .with_details("Contact form submission accepted".to_string());
    if let Err(err) = state.store.append_security_event(event).await {
        warn!(ip = %ip, error = %err, "failed to record contact event");
    }

    if let Err(err) = state.notifier.notify_submission(contact_id, &contact).await {
        warn!(contact_id, error = %err, "notification failed");
    }

    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Tu solicitud ha sido recibida. Te contactaremos pronto.",
            "contact_id": contact_id,
        })),
    )
        .into_response()
}

pub async fn health(State(state): State<AppState>) -> Response {
    let database = match state.store.health_check().await {
        Ok(()) => "healthy",
        Err(err) => {
            warn!(error = %err, "store health check failed");
            "unhealthy"
        }
    };
    let status = if database == "healthy" {
        "healthy"
    } else {
        "degraded"
    };

    (
        StatusCode::OK,
        Json(json!({
            "status": status,
            "version": env!("CARGO_PKG_VERSION"),
            "services": {
                "database": database,
                "security": "active",
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
        .into_response()
}

/// Feature summary of the active defenses.
pub async fn security_status(State(state): State<AppState>) -> Response {
    let defense = &state.config.defense;
    (
        StatusCode::OK,
        Json(json!({
            "rate_limiting": {
                "enabled": true,
                "window_ms": defense.window_ms,
                "max_requests": defense.max_requests,
            },
            "progressive_delay": {
                "enabled": true,
                "delay_after": defense.delay_after,
                "max_delay_ms": defense.max_delay_ms,
            },
            "ip_blocking": {
                "enabled": true,
                "block_duration_hours": defense.block_duration_hours,
                "permanent_block_threshold": defense.permanent_block_threshold,
            },
            "spam_detection": {
                "enabled": true,
                "threshold": defense.spam_threshold,
            },
            "suspicion_scoring": {
                "enabled": true,
                "threshold": defense.suspicion_threshold,
            },
        })),
    )
        .into_response()
}

fn rejection_response(reason: &ReasonCode, retry_after: Option<i64>) -> Response {
    match reason {
        ReasonCode::IpBlocked => (
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "Acceso denegado",
                "message": "Tu dirección IP ha sido bloqueada por actividad sospechosa.",
                "code": "IP_BLOCKED",
            })),
        )
            .into_response(),
        ReasonCode::RateLimitExceeded => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": "Demasiadas solicitudes",
                "message": "Has superado el límite de solicitudes. Intenta más tarde.",
                "code": "RATE_LIMIT_EXCEEDED",
                "retry_after": retry_after.unwrap_or(0),
            })),
        )
            .into_response(),
        ReasonCode::SpamDetected => (
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "Contenido no permitido",
                "message": "Tu mensaje ha sido identificado como spam o contiene contenido no permitido.",
                "code": "SPAM_DETECTED",
            })),
        )
            .into_response(),
        ReasonCode::Ok => StatusCode::OK.into_response(),
    }
}

fn validate_form(form: &ContactForm) -> Result<(), &'static str> {
    let name = form.name.trim();
    if name.len() < 2 || name.len() > MAX_NAME_LEN {
        return Err("El nombre debe tener entre 2 y 100 caracteres");
    }

    let email = form.email.trim();
    if !is_plausible_email(email) {
        return Err("El correo electrónico no es válido");
    }

    let description = form.problem_description.trim();
    if description.len() < MIN_DESCRIPTION_LEN || description.len() > MAX_DESCRIPTION_LEN {
        return Err("La descripción debe tener entre 10 y 2000 caracteres");
    }

    Ok(())
}

/// Shape check only: local part, one `@`, dotted domain. Deliverability is
/// not verified here.
fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() || email.len() > 254 {
        return false;
    }
    domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..")
        && domain.chars().all(|ch| ch.is_alphanumeric() || ch == '.' || ch == '-')
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}
