//! Arena-based frame tree storage
//!
//! Page.getFrameTree returns a recursive `{frame, childFrames}` structure.
//! We flatten it once while parsing and operate on the flat list afterwards:
//!
//! - No recursion (deep iframe nesting can't blow the stack)
//! - No Rc/Arc between frames, parents are plain indices
//! - Ownership checks are a linear scan over a small Vec
//!
//! ## Memory Layout
//!
//! ```text
//! Arena: Vec<FrameEntry>
//!        [root][child0][grandchild][child1]...   (depth-first, document order)
//!         ↑ 4-byte index, not a pointer
//! ```

use ahash::AHashMap;
use serde_json::Value;
use smallvec::SmallVec;

use crate::error::{DomError, Result};
use crate::types::{FrameId, FrameInfo};

/// Frame index (position in the arena)
pub type FrameIndex = u32;

/// One flattened frame
#[derive(Debug, Clone)]
pub struct FrameEntry {
    pub info: FrameInfo,
    pub parent: Option<FrameIndex>,
    pub children: SmallVec<[FrameIndex; 4]>,
    pub depth: u32,
}

/// Flattened frame tree of a single target
#[derive(Debug, Default)]
pub struct FrameArena {
    frames: Vec<FrameEntry>,
    by_id: AHashMap<FrameId, FrameIndex>,
}

impl FrameArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a Page.getFrameTree result (`{"frameTree": {...}}`)
    pub fn from_result(result: &Value) -> Result<Self> {
        let tree = result
            .get("frameTree")
            .ok_or(DomError::MissingField("frameTree"))?;
        Self::from_tree(tree)
    }

    /// Build from a `{frame, childFrames}` node, iteratively
    pub fn from_tree(tree: &Value) -> Result<Self> {
        let mut arena = Self::new();
        let mut stack: Vec<(&Value, Option<FrameIndex>, u32)> = vec![(tree, None, 0)];

        while let Some((node, parent, depth)) = stack.pop() {
            let frame = node.get("frame").ok_or(DomError::MissingField("frame"))?;
            let info: FrameInfo = serde_json::from_value(frame.clone())?;
            let index = arena.push(info, parent, depth);

            if let Some(children) = node.get("childFrames").and_then(Value::as_array) {
                // Reverse so children pop in document order
                for child in children.iter().rev() {
                    stack.push((child, Some(index), depth + 1));
                }
            }
        }

        if arena.is_empty() {
            return Err(DomError::EmptyFrameTree);
        }
        Ok(arena)
    }

    fn push(&mut self, info: FrameInfo, parent: Option<FrameIndex>, depth: u32) -> FrameIndex {
        let index = self.frames.len() as FrameIndex;
        self.by_id.insert(info.id.clone(), index);
        self.frames.push(FrameEntry {
            info,
            parent,
            children: SmallVec::new(),
            depth,
        });
        if let Some(parent) = parent {
            if let Some(entry) = self.frames.get_mut(parent as usize) {
                entry.children.push(index);
            }
        }
        index
    }

    /// Root frame (first entry)
    pub fn root(&self) -> Result<&FrameInfo> {
        self.frames
            .first()
            .map(|entry| &entry.info)
            .ok_or(DomError::EmptyFrameTree)
    }

    pub fn entry(&self, index: FrameIndex) -> Option<&FrameEntry> {
        self.frames.get(index as usize)
    }

    /// Look up a frame by CDP id
    pub fn get(&self, frame_id: &str) -> Result<&FrameInfo> {
        self.by_id
            .get(frame_id)
            .and_then(|&index| self.entry(index))
            .map(|entry| &entry.info)
            .ok_or_else(|| DomError::FrameNotFound(frame_id.to_string()))
    }

    pub fn contains(&self, frame_id: &str) -> bool {
        self.by_id.contains_key(frame_id)
    }

    /// Direct children of a frame
    pub fn children(&self, index: FrameIndex) -> impl Iterator<Item = &FrameInfo> + '_ {
        self.entry(index)
            .into_iter()
            .flat_map(|entry| entry.children.iter())
            .filter_map(|&child| self.entry(child))
            .map(|entry| &entry.info)
    }

    /// Every frame except the root, in document order
    pub fn descendants(&self) -> impl Iterator<Item = &FrameInfo> + '_ {
        self.frames.iter().skip(1).map(|entry| &entry.info)
    }

    /// Frames that declare `parent_frame_id` as their parent
    pub fn frames_with_parent<'a>(
        &'a self,
        parent_frame_id: &'a str,
    ) -> impl Iterator<Item = &'a FrameInfo> + 'a {
        self.frames
            .iter()
            .map(|entry| &entry.info)
            .filter(move |info| info.parent_id.as_deref() == Some(parent_frame_id))
    }

    /// All frames, in document order
    pub fn iter(&self) -> impl Iterator<Item = &FrameInfo> {
        self.frames.iter().map(|entry| &entry.info)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
