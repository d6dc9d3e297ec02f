use serde::Serialize;

/// The caller on whose behalf an operation runs, as resolved by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub id: String,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn anonymous() -> Self {
        Self::new("anonymous")
    }
}
