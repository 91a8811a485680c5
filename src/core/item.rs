//! Work items flowing through a job pipeline.
//!
//! A [`WorkItem`] is either a value produced by the generator (and then
//! transformed by each task), or the end-of-stream sentinel. Stages never see
//! the sentinel: the engine forwards it untouched until the sink drops it.

use serde::{Deserialize, Serialize};

/// A single unit flowing from generator through tasks to sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WorkItem<T> {
    /// A produced or transformed value.
    Present(T),
    /// End-of-stream. Returned by a generator when it has nothing more to give.
    #[default]
    Empty,
}

impl<T> WorkItem<T> {
    /// Wrap a value.
    pub fn present(value: T) -> Self {
        WorkItem::Present(value)
    }

    /// The end-of-stream sentinel.
    pub fn empty() -> Self {
        WorkItem::Empty
    }

    pub fn is_present(&self) -> bool {
        matches!(self, WorkItem::Present(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, WorkItem::Empty)
    }

    /// Borrow the payload, if any.
    pub fn as_ref(&self) -> WorkItem<&T> {
        match self {
            WorkItem::Present(value) => WorkItem::Present(value),
            WorkItem::Empty => WorkItem::Empty,
        }
    }

    /// Transform the payload, leaving `Empty` untouched.
    pub fn map<U, F>(self, f: F) -> WorkItem<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            WorkItem::Present(value) => WorkItem::Present(f(value)),
            WorkItem::Empty => WorkItem::Empty,
        }
    }

    /// Chain a stage that may itself yield `Empty`.
    pub fn and_then<U, F>(self, f: F) -> WorkItem<U>
    where
        F: FnOnce(T) -> WorkItem<U>,
    {
        match self {
            WorkItem::Present(value) => f(value),
            WorkItem::Empty => WorkItem::Empty,
        }
    }

    pub fn into_option(self) -> Option<T> {
        self.into()
    }
}

impl<T> From<Option<T>> for WorkItem<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => WorkItem::Present(value),
            None => WorkItem::Empty,
        }
    }
}

impl<T> From<WorkItem<T>> for Option<T> {
    fn from(item: WorkItem<T>) -> Self {
        match item {
            WorkItem::Present(value) => Some(value),
            WorkItem::Empty => None,
        }
    }
}
