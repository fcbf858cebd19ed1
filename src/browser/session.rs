use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A `<select>`-like control discovered on the active surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selectable {
    /// Position of the control in document order; valid for one page load.
    pub handle: usize,
    #[serde(default)]
    pub name: Option<String>,
    /// Candidate values in option order. A control without any is not explored.
    pub values: Vec<String>,
    #[serde(default)]
    pub selected: usize,
}

impl Selectable {
    pub fn selected_value(&self) -> Option<&str> {
        self.values.get(self.selected).map(String::as_str)
    }

    /// First candidate past the placeholder at index 0, or the only candidate.
    pub fn preferred_value(&self) -> Option<&str> {
        self.values.get(1).or_else(|| self.values.first()).map(String::as_str)
    }

    pub fn offers(&self, value: &str) -> bool {
        self.values.iter().any(|v| v == value)
    }
}

/// An `<input>` element and the attributes that decide whether it can be filled.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextInput {
    pub handle: usize,
    #[serde(rename = "type", default)]
    pub input_type: String,
    pub visible: bool,
    pub disabled: bool,
    pub read_only: bool,
}

const FREE_TEXT_TYPES: &[&str] = &["", "text", "email", "password", "search", "tel", "url", "number"];

impl TextInput {
    pub fn is_free_text(&self) -> bool {
        FREE_TEXT_TYPES.contains(&self.input_type.as_str())
    }

    pub fn is_fillable(&self) -> bool {
        self.is_free_text() && self.visible && !self.disabled && !self.read_only
    }
}

/// One tab or window of a rendering session.
#[async_trait]
pub trait Surface: Send + Sync {
    async fn url(&self) -> Result<String>;

    async fn screenshot(&self, path: &Path) -> Result<()>;

    /// Serialized DOM of the current document.
    async fn content(&self) -> Result<String>;

    /// Outer markup of the topmost element at the point, if any.
    async fn element_at(&self, x: i64, y: i64) -> Result<Option<String>>;

    async fn move_pointer(&self, x: f64, y: f64) -> Result<()>;

    async fn click(&self, x: f64, y: f64) -> Result<()>;

    async fn selectables(&self) -> Result<Vec<Selectable>>;

    async fn select(&self, selectable: &Selectable, value: &str) -> Result<()>;

    async fn text_inputs(&self) -> Result<Vec<TextInput>>;

    async fn type_text(&self, input: &TextInput, text: &str) -> Result<()>;

    /// Resolves when a navigation started after the last click or select completes.
    async fn wait_for_navigation(&self) -> Result<()>;

    async fn bring_to_front(&self) -> Result<()>;
}

/// A browser session owning any number of surfaces.
#[async_trait]
pub trait RenderingSession: Send + Sync {
    type Surface: Surface + 'static;

    async fn open(&self, url: &str) -> Result<Self::Surface>;

    /// Resolves with the next surface whose opener is `opener`.
    async fn wait_for_opened(&self, opener: &Self::Surface) -> Result<Self::Surface>;

    async fn close(self) -> Result<()>;
}

/// Creates fresh rendering sessions, one per explored flow.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    type Session: RenderingSession + 'static;

    async fn launch(&self) -> Result<Self::Session>;
}
