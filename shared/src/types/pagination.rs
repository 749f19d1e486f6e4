use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct PaginationParams {
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
}

impl PaginationParams {
    pub fn limit(&self) -> u64 {
        self.limit.unwrap_or(20).min(100)
    }

    pub fn offset(&self) -> u64 {
        self.offset.unwrap_or(0)
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self { limit: None, offset: None }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Paginated<T: Serialize> {
    pub items: Vec<T>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}

impl<T: Serialize> Paginated<T> {
    pub fn new(items: Vec<T>, total: u64, params: &PaginationParams) -> Self {
        Self {
            items,
            total,
            limit: params.limit(),
            offset: params.offset(),
        }
    }
}
