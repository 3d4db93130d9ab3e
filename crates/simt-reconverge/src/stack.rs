//! Context stack
//!
//! A growable array of contexts with the top at the end. Every mechanism
//! keeps its runnable contexts here; the stack refuses contexts with no
//! active lanes and can audit the lane-partition invariant on demand.

use crate::context::ExecutionContext;
use crate::error::{ReconvergenceError, Result};
use crate::isa::Pc;
use crate::mask::LaneMask;

/// Ordered contexts, bottom first
#[derive(Debug, Clone)]
pub struct ContextStack {
    width: usize,
    contexts: Vec<ExecutionContext>,
    next_sequence: u64,
    max_depth: usize,
}

impl ContextStack {
    /// Empty stack for a CTA of `width` lanes
    pub fn new(width: usize) -> Self {
        Self {
            width,
            contexts: Vec::new(),
            next_sequence: 0,
            max_depth: 0,
        }
    }

    /// Lane width of every context on this stack
    pub fn width(&self) -> usize {
        self.width
    }

    /// Drop all contexts and restart insertion numbering
    pub fn reset(&mut self) {
        self.contexts.clear();
        self.next_sequence = 0;
        self.max_depth = 0;
    }

    /// Create a context numbered for this stack without pushing it
    pub fn spawn(&mut self, active_mask: LaneMask, pc: Pc, reconverge_pc: Option<Pc>) -> ExecutionContext {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        ExecutionContext::new(active_mask, pc, reconverge_pc, sequence)
    }

    /// Push a context on top
    pub fn push(&mut self, context: ExecutionContext) -> Result<()> {
        let at = self.contexts.len();
        self.insert(at, context)
    }

    /// Insert a context at `index` (0 is the bottom, `len()` the top)
    pub fn insert(&mut self, index: usize, context: ExecutionContext) -> Result<()> {
        if index > self.contexts.len() {
            return Err(ReconvergenceError::structural(format!(
                "insert at {index} past a stack of {}",
                self.contexts.len()
            )));
        }
        self.admit(&context)?;
        self.contexts.insert(index, context);
        self.max_depth = self.max_depth.max(self.contexts.len());
        Ok(())
    }

    fn admit(&self, context: &ExecutionContext) -> Result<()> {
        if context.active_mask.width() != self.width {
            return Err(ReconvergenceError::CtaSizeMismatch {
                expected: self.width,
                actual: context.active_mask.width(),
            });
        }
        if context.active_mask.is_empty() {
            return Err(ReconvergenceError::structural(format!(
                "refusing to push context at pc {} with no active lanes",
                context.pc
            )));
        }
        Ok(())
    }

    pub fn pop(&mut self) -> Option<ExecutionContext> {
        self.contexts.pop()
    }

    pub fn top(&self) -> Option<&ExecutionContext> {
        self.contexts.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut ExecutionContext> {
        self.contexts.last_mut()
    }

    /// Context directly beneath the top
    pub fn below_top(&self) -> Option<&ExecutionContext> {
        self.contexts.len().checked_sub(2).map(|i| &self.contexts[i])
    }

    pub fn get(&self, index: usize) -> Option<&ExecutionContext> {
        self.contexts.get(index)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Deepest the stack has been since the last reset
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Contexts from bottom to top
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &ExecutionContext> {
        self.contexts.iter()
    }

    /// Remove every context, keeping numbering and depth statistics
    pub(crate) fn take_all(&mut self) -> Vec<ExecutionContext> {
        std::mem::take(&mut self.contexts)
    }

    /// Union of all active masks on the stack
    pub fn lanes(&self) -> LaneMask {
        let mut lanes = LaneMask::empty(self.width);
        for context in &self.contexts {
            lanes.union_with(&context.active_mask);
        }
        lanes
    }

    /// Check that the stack partitions exactly `expected` lanes: every
    /// context is non-empty and no lane is active in two contexts
    pub fn verify_partition(&self, expected: &LaneMask) -> Result<()> {
        let mut seen = LaneMask::empty(self.width);
        for context in &self.contexts {
            if context.active_mask.is_empty() {
                return Err(ReconvergenceError::structural(format!(
                    "ghost context with no active lanes at pc {}",
                    context.pc
                )));
            }
            if !context.active_mask.is_disjoint(&seen) {
                return Err(ReconvergenceError::structural(format!(
                    "lanes {} active in more than one context",
                    context.active_mask.intersection(&seen)
                )));
            }
            seen.union_with(&context.active_mask);
        }
        if &seen != expected {
            return Err(ReconvergenceError::structural(format!(
                "stack holds lanes {seen} but {expected} are live"
            )));
        }
        Ok(())
    }
}
