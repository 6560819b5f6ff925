use std::convert::Infallible;

use warp::{http::StatusCode, Rejection, Reply};

use crate::views;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("redis: {0}")]
    Redis(#[from] fred::error::RedisError),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Rejection carrying a store failure out of a route handler.
#[derive(Debug)]
pub struct StoreFailure(pub Error);

impl warp::reject::Reject for StoreFailure {}

impl From<Error> for Rejection {
    fn from(err: Error) -> Self {
        warp::reject::custom(StoreFailure(err))
    }
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, body) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, views::not_found())
    } else if let Some(StoreFailure(e)) = err.find::<StoreFailure>() {
        log::error!("request failed: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, views::server_error())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, views::bad_request())
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, views::bad_request())
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (StatusCode::UNSUPPORTED_MEDIA_TYPE, views::bad_request())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, views::bad_request())
    } else {
        log::debug!("rejected request: {:?}", err);
        (StatusCode::BAD_REQUEST, views::bad_request())
    };

    Ok(warp::reply::with_status(warp::reply::html(body), status))
}

/// A redis failure as seen when the server is unreachable.
#[cfg(test)]
pub(crate) fn unavailable() -> Error {
    fred::error::RedisError::new(fred::error::RedisErrorKind::IO, "connection refused").into()
}
