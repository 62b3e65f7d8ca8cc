use poem::{handler, http::StatusCode, IntoResponse, Response};
pub mod convert;
pub mod health;
pub mod params;

pub fn gen_err_response(status: StatusCode, msg: impl Into<String>) -> Response {
    Response::builder()
        .status(status)
        .content_type("text/plain; charset=utf-8")
        .body(msg.into())
}

#[handler]
pub fn index() -> impl IntoResponse {
    "HEIC to JPEG converter is running"
}
