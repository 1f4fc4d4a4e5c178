//! Default site application
//!
//! What a resolved site instance serves: a home document and a small JSON
//! API over the instance's own pieces.

use crate::TenantError;
use crate::instance::TenantInstance;
use crate::storage::{ContentRepository, ID_FIELD, PieceQuery};
use crate::tenant::TenantRecord;
use multisite_core::{Error, HttpRequest, HttpResponse};
use serde_json::{Value, json};
use tracing::debug;

/// Piece type holding site users
pub const USER_PIECE_TYPE: &str = "user";

/// Username of the seeded administrator
pub const ADMIN_USERNAME: &str = "admin";

const PASSWORD_FIELD: &str = "passwordHash";

/// First-run setup for a site's storage.
///
/// Seeds the `admin` user from the record's password digest when the
/// record has one and no admin exists yet.
pub async fn bootstrap(
    storage: &dyn ContentRepository,
    record: &TenantRecord,
) -> Result<(), TenantError> {
    let Some(hash) = record.admin_password_hash.as_deref() else {
        return Ok(());
    };

    let query = PieceQuery::new().where_eq("username", ADMIN_USERNAME);
    if !storage.find(USER_PIECE_TYPE, &query).await?.is_empty() {
        return Ok(());
    }

    storage
        .insert(
            USER_PIECE_TYPE,
            json!({
                "username": ADMIN_USERNAME,
                "title": ADMIN_USERNAME,
                PASSWORD_FIELD: hash,
            }),
        )
        .await?;
    debug!(tenant = %record.id, "seeded admin user");
    Ok(())
}

fn redact(mut piece: Value) -> Value {
    if let Some(map) = piece.as_object_mut() {
        map.remove(PASSWORD_FIELD);
    }
    piece
}

fn home(instance: &TenantInstance) -> Result<HttpResponse, Error> {
    HttpResponse::ok().with_json(&json!({
        "title": instance.title(),
        "csrfCookieName": instance.csrf_cookie_name(),
        "site": instance.site().map(TenantRecord::public_view),
    }))
}

async fn find_pieces(
    instance: &TenantInstance,
    piece_type: &str,
    request: &HttpRequest,
) -> Result<HttpResponse, Error> {
    let query = request
        .query_params
        .iter()
        .fold(PieceQuery::new(), |query, (field, value)| {
            query.where_eq(field.as_str(), value.as_str())
        });
    let pieces: Vec<Value> = instance
        .storage()
        .find(piece_type, &query)
        .await?
        .into_iter()
        .map(redact)
        .collect();
    HttpResponse::ok().with_json(&pieces)
}

async fn insert_piece(
    instance: &TenantInstance,
    piece_type: &str,
    request: &HttpRequest,
) -> Result<HttpResponse, Error> {
    let piece: Value = request.json()?;
    let saved = instance.storage().insert(piece_type, piece).await?;
    HttpResponse::created().with_json(&redact(saved))
}

async fn update_piece(
    instance: &TenantInstance,
    piece_type: &str,
    id: &str,
    request: &HttpRequest,
) -> Result<HttpResponse, Error> {
    let mut piece: Value = request.json()?;
    let Some(map) = piece.as_object_mut() else {
        return Err(Error::BadRequest("piece must be a JSON object".to_string()));
    };
    map.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    let saved = instance.storage().update(piece_type, piece).await?;
    HttpResponse::ok().with_json(&redact(saved))
}

/// Serve one request on a site instance
pub async fn handle(
    instance: &TenantInstance,
    request: &HttpRequest,
) -> Result<HttpResponse, Error> {
    let segments = request.segments();
    match (request.method.as_str(), segments.as_slice()) {
        ("GET", []) => home(instance),
        ("GET", ["api", "pieces", piece_type]) => find_pieces(instance, piece_type, request).await,
        ("POST", ["api", "pieces", piece_type]) => {
            insert_piece(instance, piece_type, request).await
        }
        ("PUT", ["api", "pieces", piece_type, id]) => {
            update_piece(instance, piece_type, id, request).await
        }
        (_, []) | (_, ["api", "pieces", ..]) => {
            Err(Error::MethodNotAllowed(request.method.clone()))
        }
        _ => Err(Error::NotFound("Not Found".to_string())),
    }
}
