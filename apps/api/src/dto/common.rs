use serde::{Deserialize, Serialize};

/// Generic message envelope for operations with no resource body.
#[derive(Debug, Serialize)]
pub struct GenericMessageResponse {
    pub message: String,
}

/// Pagination query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl PageQuery {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.unwrap_or(50)
    }
}

/// Audit reason carried on destructive requests.
#[derive(Debug, Default, Deserialize)]
pub struct ReasonParams {
    pub reason: Option<String>,
}
