//! Persisted position of the floating quick-add widget.
//!
//! The position is stored as JSON under one preference key, restored at
//! mount, and always clamped so the widget stays fully inside the viewport
//! minus a margin. Drag state itself is never persisted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use cortex_core::config::WidgetConfig;
use cortex_core::{CortexError, Result};

// =============================================================================
// Preference storage
// =============================================================================

/// Opaque string key/value storage for UI preferences.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Preferences that live only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }
}

/// Preferences kept in a JSON object on disk.
///
/// The whole file is read on every `get` and rewritten on every change.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FilePreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&content).map_err(|e| {
            CortexError::Preferences(format!(
                "Failed to parse {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn write_all(&self, values: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(values)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    fn update(&self, change: impl FnOnce(&mut HashMap<String, String>)) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut values = self.read_all()?;
        change(&mut values);
        self.write_all(&values)
    }
}

impl PreferenceStore for FilePreferences {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|values| {
            values.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|values| {
            values.remove(key);
        })
    }
}

// =============================================================================
// Geometry
// =============================================================================

/// Top-left corner of the widget in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementSize {
    pub width: f64,
    pub height: f64,
}

/// Clamp one axis into `[margin, extent - margin - size]`.
///
/// When the element does not fit, it is pinned to `margin`.
fn clamp_axis(value: f64, extent: f64, size: f64, margin: f64) -> f64 {
    let max = extent - margin - size;
    if !value.is_finite() || !max.is_finite() || max < margin {
        return margin;
    }
    value.clamp(margin, max)
}

// =============================================================================
// Position store
// =============================================================================

/// Loads, clamps and saves the widget position.
#[derive(Clone)]
pub struct DraggablePositionStore {
    prefs: Arc<dyn PreferenceStore>,
    key: String,
    margin: f64,
    size: ElementSize,
}

impl DraggablePositionStore {
    pub fn new(prefs: Arc<dyn PreferenceStore>, config: &WidgetConfig) -> Self {
        Self {
            prefs,
            key: config.position_key.clone(),
            margin: config.margin,
            size: ElementSize {
                width: config.width,
                height: config.height,
            },
        }
    }

    pub fn margin(&self) -> f64 {
        self.margin
    }

    pub fn size(&self) -> ElementSize {
        self.size
    }

    /// Keep the whole element inside the viewport minus the margin.
    pub fn clamp(&self, position: Position, viewport: Viewport) -> Position {
        Position {
            x: clamp_axis(position.x, viewport.width, self.size.width, self.margin),
            y: clamp_axis(position.y, viewport.height, self.size.height, self.margin),
        }
    }

    /// Bottom-left corner, one margin in from each edge.
    pub fn default_position(&self, viewport: Viewport) -> Position {
        self.clamp(
            Position {
                x: self.margin,
                y: viewport.height - self.size.height - self.margin,
            },
            viewport,
        )
    }

    /// The persisted position clamped to `viewport`, or the default.
    ///
    /// Unreadable or malformed preferences fall back to the default.
    pub fn load(&self, viewport: Viewport) -> Position {
        let raw = match self.prefs.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return self.default_position(viewport),
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Failed to read widget position");
                return self.default_position(viewport);
            }
        };
        match serde_json::from_str::<Position>(&raw) {
            Ok(position) => self.clamp(position, viewport),
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Ignoring malformed widget position");
                self.default_position(viewport)
            }
        }
    }

    pub fn save(&self, position: Position) -> Result<()> {
        let raw = serde_json::to_string(&position)?;
        self.prefs.set(&self.key, &raw)?;
        tracing::debug!(x = position.x, y = position.y, "Widget position saved");
        Ok(())
    }

    /// Forget the persisted position.
    pub fn reset(&self) -> Result<()> {
        self.prefs.remove(&self.key)
    }
}

// =============================================================================
// Drag interaction
// =============================================================================

/// A pointer event in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub pointer_id: u32,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy)]
struct DragOrigin {
    pointer_id: u32,
    pointer_x: f64,
    pointer_y: f64,
    start: Position,
}

/// Pointer-driven dragging of the widget.
///
/// Pointer-down captures the pointer, moves are clamped, and pointer-up
/// releases the capture and persists the final position.
pub struct DragController {
    store: DraggablePositionStore,
    viewport: Viewport,
    position: Position,
    drag: Option<DragOrigin>,
}

impl DragController {
    /// Restore the persisted position for `viewport`.
    pub fn mount(store: DraggablePositionStore, viewport: Viewport) -> Self {
        let position = store.load(viewport);
        Self {
            store,
            viewport,
            position,
            drag: None,
        }
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    /// The pointer currently captured, if any.
    pub fn captured_pointer(&self) -> Option<u32> {
        self.drag.map(|d| d.pointer_id)
    }

    /// Capture the pointer. Ignored while another pointer is captured.
    pub fn pointer_down(&mut self, event: PointerEvent) -> bool {
        if self.drag.is_some() {
            return false;
        }
        self.drag = Some(DragOrigin {
            pointer_id: event.pointer_id,
            pointer_x: event.x,
            pointer_y: event.y,
            start: self.position,
        });
        true
    }

    /// Move with the captured pointer. Returns the new position.
    pub fn pointer_move(&mut self, event: PointerEvent) -> Option<Position> {
        let origin = self.drag.filter(|d| d.pointer_id == event.pointer_id)?;
        let target = Position {
            x: origin.start.x + (event.x - origin.pointer_x),
            y: origin.start.y + (event.y - origin.pointer_y),
        };
        self.position = self.store.clamp(target, self.viewport);
        Some(self.position)
    }

    /// Release the capture and persist the final position.
    ///
    /// Returns `Ok(None)` for a pointer that was not captured. The capture is
    /// released even when saving fails.
    pub fn pointer_up(&mut self, event: PointerEvent) -> Result<Option<Position>> {
        if self.captured_pointer() != Some(event.pointer_id) {
            return Ok(None);
        }
        self.pointer_move(event);
        self.drag = None;
        self.store.save(self.position)?;
        Ok(Some(self.position))
    }

    /// Re-clamp after the viewport changed size.
    pub fn resize(&mut self, viewport: Viewport) -> Position {
        self.viewport = viewport;
        self.position = self.store.clamp(self.position, viewport);
        self.position
    }
}
