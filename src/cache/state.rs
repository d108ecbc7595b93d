use serde::Serialize;

/// Three-way status observed by bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupStatus {
    Loading,
    Success,
    Error,
}

/// `{status, value}` pair published by a lookup instance.
///
/// `value` may be present alongside `Loading` (a revalidation is in flight)
/// or `Error` (the last refresh failed but earlier data is still shown).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LookupState<V> {
    pub status: LookupStatus,
    pub value: Option<V>,
}

impl<V> LookupState<V> {
    pub fn loading(value: Option<V>) -> Self {
        Self {
            status: LookupStatus::Loading,
            value,
        }
    }

    pub fn success(value: V) -> Self {
        Self {
            status: LookupStatus::Success,
            value: Some(value),
        }
    }

    pub fn error(value: Option<V>) -> Self {
        Self {
            status: LookupStatus::Error,
            value,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.status == LookupStatus::Loading
    }

    pub fn is_success(&self) -> bool {
        self.status == LookupStatus::Success
    }

    pub fn is_error(&self) -> bool {
        self.status == LookupStatus::Error
    }

    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }
}

impl<V> Default for LookupState<V> {
    fn default() -> Self {
        Self::loading(None)
    }
}
