//! Generic integer handles shared by every resource kind.
//!
//! A handle packs a slot index and that slot's generation into one positive
//! `i32`. Retiring a handle bumps the slot generation, so an old id can never
//! resolve to the slot's next occupant. A slot whose generation counter runs
//! out is retired for good instead of wrapping.

use crate::error::{DxError, Result};
use std::any::Any;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Opaque handle value handed to callers
pub type Handle = i32;

/// Value written into a delete flag when its handle is retired
pub const DELETED: i32 = -1;

const INDEX_BITS: u32 = 20;
const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;
const MAX_SLOTS: usize = 1 << INDEX_BITS;
/// Generations run 1..=MAX_GENERATION so a packed handle stays positive
const MAX_GENERATION: u32 = (1 << (31 - INDEX_BITS)) - 1;

/// Resource kinds sharing the handle space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    File,
    Graphic,
    Font,
    Sound,
}

/// Externally owned lifecycle flag. Cloning shares the same cell, so the
/// owner sees the `DELETED` write made at retirement.
#[derive(Debug, Clone, Default)]
pub struct DeleteFlag(Arc<AtomicI32>);

impl DeleteFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> i32 {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, value: i32) {
        self.0.store(value, Ordering::Release);
    }

    pub fn is_deleted(&self) -> bool {
        self.get() == DELETED
    }

    fn mark_deleted(&self) {
        self.set(DELETED);
    }
}

struct Live {
    kind: HandleKind,
    resource: Box<dyn Any + Send>,
    delete_flags: Vec<DeleteFlag>,
}

struct Slot {
    generation: u32,
    live: Option<Live>,
}

/// Arena of typed slots addressed by (index, generation) handles
#[derive(Default)]
pub struct HandleTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live_count: usize,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `resource` under a fresh handle
    pub fn allocate<T: Any + Send>(&mut self, kind: HandleKind, resource: T) -> Result<Handle> {
        let live = Live {
            kind,
            resource: Box::new(resource),
            delete_flags: Vec::new(),
        };

        let index = match self.free.pop() {
            Some(index) => index,
            None if self.slots.len() < MAX_SLOTS => {
                self.slots.push(Slot {
                    generation: 1,
                    live: None,
                });
                (self.slots.len() - 1) as u32
            }
            None => return Err(DxError::HandleTableFull),
        };

        let slot = &mut self.slots[index as usize];
        slot.live = Some(live);
        self.live_count += 1;

        let handle = pack(index, slot.generation);
        trace!(handle, ?kind, "allocated handle");
        Ok(handle)
    }

    /// Borrow the resource behind `handle`, checking kind and type
    pub fn get<T: Any>(&self, handle: Handle, kind: HandleKind) -> Result<&T> {
        self.live(handle)
            .filter(|live| live.kind == kind)
            .and_then(|live| live.resource.downcast_ref::<T>())
            .ok_or(DxError::InvalidHandle(handle))
    }

    pub fn get_mut<T: Any>(&mut self, handle: Handle, kind: HandleKind) -> Result<&mut T> {
        self.live_mut(handle)
            .filter(|live| live.kind == kind)
            .and_then(|live| live.resource.downcast_mut::<T>())
            .ok_or(DxError::InvalidHandle(handle))
    }

    pub fn is_valid(&self, handle: Handle, kind: HandleKind) -> bool {
        self.kind_of(handle) == Some(kind)
    }

    /// Kind of a live handle
    pub fn kind_of(&self, handle: Handle) -> Option<HandleKind> {
        self.live(handle).map(|live| live.kind)
    }

    /// Register a flag to be set to `DELETED` when `handle` is retired
    pub fn register_delete_flag(&mut self, handle: Handle, flag: &DeleteFlag) -> Result<()> {
        let live = self.live_mut(handle).ok_or(DxError::InvalidHandle(handle))?;
        live.delete_flags.push(flag.clone());
        Ok(())
    }

    /// Retire `handle` whatever its kind, firing its delete flags
    pub fn retire(&mut self, handle: Handle) -> Result<(HandleKind, Box<dyn Any + Send>)> {
        let index = self
            .locate(handle)
            .ok_or(DxError::InvalidHandle(handle))?;

        let slot = &mut self.slots[index];
        let live = slot.live.take().ok_or(DxError::InvalidHandle(handle))?;
        for flag in &live.delete_flags {
            flag.mark_deleted();
        }

        slot.generation += 1;
        if slot.generation <= MAX_GENERATION {
            self.free.push(index as u32);
        }
        self.live_count -= 1;

        trace!(handle, kind = ?live.kind, flags = live.delete_flags.len(), "retired handle");
        Ok((live.kind, live.resource))
    }

    /// Retire `handle` only if it belongs to `kind`, returning its resource
    pub fn retire_as<T: Any>(&mut self, handle: Handle, kind: HandleKind) -> Result<T> {
        if !self.is_valid(handle, kind) || self.get::<T>(handle, kind).is_err() {
            return Err(DxError::InvalidHandle(handle));
        }
        let (_, resource) = self.retire(handle)?;
        resource
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| DxError::InvalidHandle(handle))
    }

    /// Retire every live handle of `kind`. Returns how many were retired.
    pub fn retire_all(&mut self, kind: HandleKind) -> usize {
        let handles: Vec<Handle> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.live.as_ref().is_some_and(|live| live.kind == kind))
            .map(|(index, slot)| pack(index as u32, slot.generation))
            .collect();

        for handle in &handles {
            let _ = self.retire(*handle);
        }
        handles.len()
    }

    /// Number of live handles across all kinds
    pub fn len(&self) -> usize {
        self.live_count
    }

    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    fn locate(&self, handle: Handle) -> Option<usize> {
        let (index, generation) = unpack(handle)?;
        let slot = self.slots.get(index as usize)?;
        (slot.generation == generation && slot.live.is_some()).then_some(index as usize)
    }

    fn live(&self, handle: Handle) -> Option<&Live> {
        let index = self.locate(handle)?;
        self.slots[index].live.as_ref()
    }

    fn live_mut(&mut self, handle: Handle) -> Option<&mut Live> {
        let index = self.locate(handle)?;
        self.slots[index].live.as_mut()
    }
}

impl std::fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleTable")
            .field("slots", &self.slots.len())
            .field("live", &self.live_count)
            .finish()
    }
}

fn pack(index: u32, generation: u32) -> Handle {
    ((generation << INDEX_BITS) | index) as Handle
}

fn unpack(handle: Handle) -> Option<(u32, u32)> {
    if handle <= 0 {
        return None;
    }
    let raw = handle as u32;
    Some((raw & INDEX_MASK, raw >> INDEX_BITS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_get() {
        let mut table = HandleTable::new();
        let a = table.allocate(HandleKind::File, String::from("a")).unwrap();
        let b = table.allocate(HandleKind::Font, 42u32).unwrap();

        assert!(a > 0 && b > 0);
        assert_ne!(a, b);
        assert_eq!(table.get::<String>(a, HandleKind::File).unwrap(), "a");
        assert_eq!(*table.get::<u32>(b, HandleKind::Font).unwrap(), 42);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_wrong_kind_is_invalid() {
        let mut table = HandleTable::new();
        let font = table.allocate(HandleKind::Font, 7u32).unwrap();

        assert!(matches!(
            table.get::<u32>(font, HandleKind::File),
            Err(DxError::InvalidHandle(h)) if h == font
        ));
        assert!(table.retire_as::<u32>(font, HandleKind::File).is_err());
        assert!(table.is_valid(font, HandleKind::Font));
    }

    #[test]
    fn test_never_issued_is_invalid() {
        let table = HandleTable::new();
        assert!(table.get::<u32>(0, HandleKind::File).is_err());
        assert!(table.get::<u32>(-1, HandleKind::File).is_err());
        assert!(table.get::<u32>(pack(5, 1), HandleKind::File).is_err());
    }

    #[test]
    fn test_retired_handle_is_not_aliased() {
        let mut table = HandleTable::new();
        let old = table.allocate(HandleKind::File, 1u8).unwrap();
        table.retire(old).unwrap();

        // The slot is reused with a new generation
        let new = table.allocate(HandleKind::File, 2u8).unwrap();
        assert_ne!(old, new);
        assert_eq!(old as u32 & INDEX_MASK, new as u32 & INDEX_MASK);

        assert!(table.get::<u8>(old, HandleKind::File).is_err());
        assert_eq!(*table.get::<u8>(new, HandleKind::File).unwrap(), 2);
        assert!(matches!(table.retire(old), Err(DxError::InvalidHandle(_))));
    }

    #[test]
    fn test_delete_flags_fire_once() {
        let mut table = HandleTable::new();
        let handle = table.allocate(HandleKind::Graphic, ()).unwrap();

        let first = DeleteFlag::new();
        let second = DeleteFlag::new();
        table.register_delete_flag(handle, &first).unwrap();
        table.register_delete_flag(handle, &second).unwrap();
        assert!(!first.is_deleted());

        table.retire(handle).unwrap();
        assert!(first.is_deleted());
        assert!(second.is_deleted());

        // Owner resets the flag; a second retire must not touch it again
        first.set(5);
        assert!(table.retire(handle).is_err());
        assert_eq!(first.get(), 5);
    }

    #[test]
    fn test_register_on_invalid_handle() {
        let mut table = HandleTable::new();
        let flag = DeleteFlag::new();
        assert!(table.register_delete_flag(99, &flag).is_err());
    }

    #[test]
    fn test_retire_all_by_kind() {
        let mut table = HandleTable::new();
        let f1 = table.allocate(HandleKind::File, 1u8).unwrap();
        let f2 = table.allocate(HandleKind::File, 2u8).unwrap();
        let s = table.allocate(HandleKind::Sound, 3u8).unwrap();
        let flag = DeleteFlag::new();
        table.register_delete_flag(f2, &flag).unwrap();

        assert_eq!(table.retire_all(HandleKind::File), 2);
        assert!(!table.is_valid(f1, HandleKind::File));
        assert!(flag.is_deleted());
        assert!(table.is_valid(s, HandleKind::Sound));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_exhausted_generation_retires_slot() {
        let mut table = HandleTable::new();
        let mut handle = table.allocate(HandleKind::File, 0u8).unwrap();
        for _ in 1..MAX_GENERATION {
            table.retire(handle).unwrap();
            handle = table.allocate(HandleKind::File, 0u8).unwrap();
        }
        assert_eq!(handle as u32 >> INDEX_BITS, MAX_GENERATION);
        table.retire(handle).unwrap();

        // Slot 0 is spent; the next handle lands in a fresh slot
        let next = table.allocate(HandleKind::File, 0u8).unwrap();
        assert_eq!(next as u32 & INDEX_MASK, 1);
        assert!(next > 0);
    }
}
