use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct KeyQuery {
    pub key: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateOpenForm {
    pub size: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateCloseForm {
    pub key: String,
    pub size: i64,
    pub fid: i64,
    pub devid: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeleteForm {
    pub key: String,
}
