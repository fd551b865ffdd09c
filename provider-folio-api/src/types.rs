//! Folio API request/response types
//!
//! Resource bodies themselves are the shared DTOs in
//! [`bridge_traits::remote`]; this module only holds the envelope and the
//! small write bodies.

use serde::{Deserialize, Serialize};

/// Response body that is either wrapped as `{"data": ...}` or bare.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiBody<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> ApiBody<T> {
    pub fn into_inner(self) -> T {
        match self {
            ApiBody::Wrapped { data } => data,
            ApiBody::Bare(data) => data,
        }
    }
}

/// `POST /bookshelf` body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShelfAddRequest {
    pub book_id: i64,
}

/// `PATCH /bookshelf/{bookId}/favorite` body
///
/// Carries the target value, never a toggle instruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteRequest {
    pub is_favorite: bool,
}

/// Error body returned by the API on 4xx/5xx.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(alias = "error")]
    pub message: String,
}
