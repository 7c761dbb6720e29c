use warp::{Rejection, Reply};

use crate::error::{ErrorBody, RdmError};

/// Maps an `RdmError` rejection into the shaped JSON error response
/// documented per-endpoint in §6; never lets an error reach the caller as a
/// bare 500 with no body (§7 propagation policy).
pub async fn recover(rejection: Rejection) -> Result<impl Reply, Rejection> {
    if let Some(err) = rejection.find::<RdmError>() {
        let body = ErrorBody::from(err);
        return Ok(warp::reply::with_status(
            warp::reply::json(&body),
            err.status(),
        ));
    }

    if rejection.is_not_found() {
        let body = ErrorBody {
            error: "not found".to_string(),
        };
        return Ok(warp::reply::with_status(
            warp::reply::json(&body),
            warp::http::StatusCode::NOT_FOUND,
        ));
    }

    if rejection.find::<warp::filters::body::BodyDeserializeError>().is_some() {
        let body = ErrorBody {
            error: "malformed request body".to_string(),
        };
        return Ok(warp::reply::with_status(
            warp::reply::json(&body),
            warp::http::StatusCode::BAD_REQUEST,
        ));
    }

    let body = ErrorBody {
        error: "internal error".to_string(),
    };
    Ok(warp::reply::with_status(
        warp::reply::json(&body),
        warp::http::StatusCode::INTERNAL_SERVER_ERROR,
    ))
}
