//! Simulation object record
//!
//! A `SimObject` is the scheduler's view of one simulated entity: identity,
//! rank, pass participation, service window, status flags, bookkeeping clocks
//! and the behaviour that implements its physics.
//!
//! # Critical Invariants
//!
//! 1. **Rank order**: once ranks are final, `rank(child) > rank(parent)` and
//!    `rank(dependent) > rank(dependency)`
//! 2. **Rank freeze**: rank and pass membership never change once the run starts
//! 3. **Parent is a relation**: parents are referenced by id, never owned

use crate::core::time::Timestamp;
use crate::models::behavior::ObjectBehavior;
use crate::models::lock::{ObjectLock, ObjectLockGuard};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

/// Rank of an object within one pass
pub type Rank = u32;

/// Unique object identifier (index into the model)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub usize);

impl ObjectId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Direction in which a pass walks the rank buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traversal {
    Ascending,
    Descending,
}

/// One of the three synchronisation passes of a convergence iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PassType {
    PreTopDown,
    BottomUp,
    PostTopDown,
}

impl PassType {
    /// Execution order within one iteration
    pub const ALL: [PassType; 3] = [PassType::PreTopDown, PassType::BottomUp, PassType::PostTopDown];

    pub fn index(self) -> usize {
        match self {
            PassType::PreTopDown => 0,
            PassType::BottomUp => 1,
            PassType::PostTopDown => 2,
        }
    }

    /// Bucket order for this pass
    ///
    /// Both top-down passes walk ranks from highest to lowest; the bottom-up
    /// pass walks from lowest to highest.
    pub fn traversal(self) -> Traversal {
        match self {
            PassType::PreTopDown | PassType::PostTopDown => Traversal::Descending,
            PassType::BottomUp => Traversal::Ascending,
        }
    }

    pub fn flag(self) -> PassSet {
        match self {
            PassType::PreTopDown => PassSet::PRE_TOPDOWN,
            PassType::BottomUp => PassSet::BOTTOM_UP,
            PassType::PostTopDown => PassSet::POST_TOPDOWN,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PassType::PreTopDown => "presync",
            PassType::BottomUp => "sync",
            PassType::PostTopDown => "postsync",
        }
    }
}

impl fmt::Display for PassType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Passes an object participates in
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PassSet: u8 {
        const PRE_TOPDOWN = 0b001;
        const BOTTOM_UP = 0b010;
        const POST_TOPDOWN = 0b100;
    }
}

impl PassSet {
    pub fn includes(self, pass: PassType) -> bool {
        self.contains(pass.flag())
    }

    /// Last pass of an iteration this set takes part in
    pub fn last_pass(self) -> Option<PassType> {
        PassType::ALL.iter().rev().copied().find(|p| self.includes(*p))
    }
}

bitflags! {
    /// Object status flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ObjectFlags: u32 {
        /// State is driven from outside the simulation
        const EXTERNAL = 0b0_0001;
        /// Object state is locked against external writes
        const LOCKED = 0b0_0010;
        /// Rank assignment is currently visiting this object
        const RERANK = 0b0_0100;
        /// `recalc` must run before the next sync
        const RECALC = 0b0_1000;
        /// Sync may be skipped while the object's last result is still valid
        const SKIP_SAFE = 0b1_0000;
    }
}

/// Half-open interval `[in_service, out_service)` during which the object syncs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceWindow {
    pub in_service: Timestamp,
    pub out_service: Timestamp,
}

/// Where a time falls relative to a service window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    /// Not in service yet; holds the in-service time
    Pending(Timestamp),
    Active,
    Retired,
}

impl ServiceWindow {
    /// In service for the whole run
    pub const ALWAYS: ServiceWindow = ServiceWindow {
        in_service: Timestamp::ZERO,
        out_service: Timestamp::NEVER,
    };

    pub fn new(in_service: Timestamp, out_service: Timestamp) -> Self {
        Self {
            in_service,
            out_service,
        }
    }

    pub fn status_at(&self, time: Timestamp) -> ServiceStatus {
        if time < self.in_service {
            ServiceStatus::Pending(self.in_service)
        } else if time >= self.out_service {
            ServiceStatus::Retired
        } else {
            ServiceStatus::Active
        }
    }

    pub fn is_active(&self, time: Timestamp) -> bool {
        self.status_at(time) == ServiceStatus::Active
    }
}

impl Default for ServiceWindow {
    fn default() -> Self {
        Self::ALWAYS
    }
}

/// Builder for objects added to a [`Model`](crate::models::model::Model)
pub struct ObjectBuilder {
    pub(crate) name: Option<String>,
    pub(crate) rank: Rank,
    pub(crate) passes: PassSet,
    pub(crate) service: ServiceWindow,
    pub(crate) flags: ObjectFlags,
    pub(crate) behavior: Box<dyn ObjectBehavior>,
}

impl ObjectBuilder {
    /// New object taking part in the bottom-up pass only
    pub fn new(behavior: impl ObjectBehavior + 'static) -> Self {
        Self::from_boxed(Box::new(behavior))
    }

    pub fn from_boxed(behavior: Box<dyn ObjectBehavior>) -> Self {
        Self {
            name: None,
            rank: 0,
            passes: PassSet::BOTTOM_UP,
            service: ServiceWindow::ALWAYS,
            flags: ObjectFlags::empty(),
            behavior,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Starting rank; assignment can only raise it
    pub fn rank(mut self, rank: Rank) -> Self {
        self.rank = rank;
        self
    }

    pub fn passes(mut self, passes: PassSet) -> Self {
        self.passes = passes;
        self
    }

    pub fn service(mut self, in_service: Timestamp, out_service: Timestamp) -> Self {
        self.service = ServiceWindow::new(in_service, out_service);
        self
    }

    pub fn flags(mut self, flags: ObjectFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Scheduler record for one simulated entity
pub struct SimObject {
    id: ObjectId,
    name: Option<String>,
    rank: Rank,
    requested_rank: Rank,
    parent: Option<ObjectId>,
    depends_on: Vec<ObjectId>,
    passes: PassSet,
    service: ServiceWindow,
    flags: AtomicU32,
    clock: AtomicI64,
    valid_to: AtomicI64,
    lock: ObjectLock,
    behavior: Box<dyn ObjectBehavior>,
}

impl SimObject {
    pub(crate) fn from_builder(id: ObjectId, builder: ObjectBuilder) -> Self {
        Self {
            id,
            name: builder.name,
            rank: builder.rank,
            requested_rank: builder.rank,
            parent: None,
            depends_on: Vec::new(),
            passes: builder.passes,
            service: builder.service,
            flags: AtomicU32::new(builder.flags.bits()),
            clock: AtomicI64::new(Timestamp::ZERO.as_secs()),
            valid_to: AtomicI64::new(Timestamp::ZERO.as_secs()),
            lock: ObjectLock::new(),
            behavior: builder.behavior,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name if set, otherwise `kind:#id`
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}:{}", self.behavior.kind(), self.id),
        }
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Rank given to the builder, before any assignment raised it
    pub fn requested_rank(&self) -> Rank {
        self.requested_rank
    }

    pub fn parent(&self) -> Option<ObjectId> {
        self.parent
    }

    /// Non-structural ordering constraints: objects that must rank below this one
    pub fn dependencies(&self) -> &[ObjectId] {
        &self.depends_on
    }

    pub fn passes(&self) -> PassSet {
        self.passes
    }

    pub fn service(&self) -> ServiceWindow {
        self.service
    }

    pub fn behavior(&self) -> &dyn ObjectBehavior {
        self.behavior.as_ref()
    }

    /// Time of the last completed synchronisation
    pub fn clock(&self) -> Timestamp {
        Timestamp::from_secs(self.clock.load(Ordering::Acquire))
    }

    /// Next expected change reported by the last sync (`ZERO` before the first)
    pub fn valid_to(&self) -> Timestamp {
        Timestamp::from_secs(self.valid_to.load(Ordering::Acquire))
    }

    /// Lock guarding state that other objects write into during a pass
    pub fn lock(&self) -> ObjectLockGuard<'_> {
        self.lock.lock()
    }

    pub fn object_lock(&self) -> &ObjectLock {
        &self.lock
    }

    // ========================================================================
    // Status flags
    // ========================================================================

    pub fn flags(&self) -> ObjectFlags {
        ObjectFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn has_flags(&self, flags: ObjectFlags) -> bool {
        self.flags().contains(flags)
    }

    pub fn set_flags(&self, flags: ObjectFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub fn clear_flags(&self, flags: ObjectFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// Ask for `recalc` to run before this object's next sync
    pub fn request_recalc(&self) {
        self.set_flags(ObjectFlags::RECALC);
    }

    /// Clear `RECALC`, returning whether it was set
    pub(crate) fn take_recalc(&self) -> bool {
        let previous = self.flags.fetch_and(!ObjectFlags::RECALC.bits(), Ordering::AcqRel);
        previous & ObjectFlags::RECALC.bits() != 0
    }

    // ========================================================================
    // Scheduler bookkeeping
    // ========================================================================

    pub(crate) fn record_valid_to(&self, valid_to: Timestamp) {
        self.valid_to.store(valid_to.as_secs(), Ordering::Release);
    }

    pub(crate) fn record_clock(&self, time: Timestamp) {
        self.clock.store(time.as_secs(), Ordering::Release);
    }

    pub(crate) fn set_rank(&mut self, rank: Rank) {
        self.rank = rank;
    }

    pub(crate) fn set_parent(&mut self, parent: Option<ObjectId>) {
        self.parent = parent;
    }

    pub(crate) fn add_dependency(&mut self, dependency: ObjectId) {
        if !self.depends_on.contains(&dependency) {
            self.depends_on.push(dependency);
        }
    }

    pub(crate) fn remove_dependency(&mut self, dependency: ObjectId) {
        self.depends_on.retain(|d| *d != dependency);
    }
}

impl fmt::Debug for SimObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimObject")
            .field("id", &self.id)
            .field("name", &self.display_name())
            .field("rank", &self.rank)
            .field("parent", &self.parent)
            .field("passes", &self.passes)
            .field("flags", &self.flags())
            .field("clock", &self.clock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::behavior::{CallbackError, NextChange};

    struct Idle;

    impl ObjectBehavior for Idle {
        fn sync(&self, _: &SimObject, _: Timestamp, _: PassType) -> Result<NextChange, CallbackError> {
            Ok(NextChange::Never)
        }
    }

    #[test]
    fn test_traversal_directions() {
        assert_eq!(PassType::PreTopDown.traversal(), Traversal::Descending);
        assert_eq!(PassType::BottomUp.traversal(), Traversal::Ascending);
        assert_eq!(PassType::PostTopDown.traversal(), Traversal::Descending);
    }

    #[test]
    fn test_last_pass() {
        assert_eq!(PassSet::all().last_pass(), Some(PassType::PostTopDown));
        assert_eq!(
            (PassSet::PRE_TOPDOWN | PassSet::BOTTOM_UP).last_pass(),
            Some(PassType::BottomUp)
        );
        assert_eq!(PassSet::empty().last_pass(), None);
    }

    #[test]
    fn test_service_window_is_half_open() {
        let window = ServiceWindow::new(Timestamp::from_secs(10), Timestamp::from_secs(20));
        assert_eq!(
            window.status_at(Timestamp::from_secs(5)),
            ServiceStatus::Pending(Timestamp::from_secs(10))
        );
        assert_eq!(window.status_at(Timestamp::from_secs(10)), ServiceStatus::Active);
        assert_eq!(window.status_at(Timestamp::from_secs(19)), ServiceStatus::Active);
        assert_eq!(window.status_at(Timestamp::from_secs(20)), ServiceStatus::Retired);
    }

    #[test]
    fn test_recalc_flag_round_trip() {
        let obj = SimObject::from_builder(ObjectId(0), ObjectBuilder::new(Idle));
        assert!(!obj.take_recalc());
        obj.request_recalc();
        assert!(obj.has_flags(ObjectFlags::RECALC));
        assert!(obj.take_recalc());
        assert!(!obj.has_flags(ObjectFlags::RECALC));
    }

    #[test]
    fn test_display_name_falls_back_to_kind() {
        let obj = SimObject::from_builder(ObjectId(3), ObjectBuilder::new(Idle));
        assert_eq!(obj.display_name(), "object:#3");
        let named = SimObject::from_builder(ObjectId(4), ObjectBuilder::new(Idle).name("feeder"));
        assert_eq!(named.display_name(), "feeder");
    }
}
